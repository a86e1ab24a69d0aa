// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Time-sliced audio clips
//!
//! A clip is split into consecutive buffers, one per chunk. Buffers are
//! decoded to interleaved 16-bit PCM before they reach the backend.

use super::{AssetKind, AssetPayload, LoadContext, LoadOutcome};
use crate::backend::{AudioBufferDesc, DecodeContext, SlotDesc};
use crate::container::{AssetHeader, MAX_CHUNKS};
use crate::error::{AssetError, Result};
use crate::streaming::ChunkMask;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use speedy::{Readable, Writable};
use std::sync::Arc;

pub const AUDIO_TYPE_NAME: &str = "AudioClip";
pub const AUDIO_SERIALIZED_VERSION: u32 = 1;
pub const MAX_CHANNELS: u16 = 8;

/// Encoding of the stored chunk bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Readable, Writable)]
pub enum AudioFormat {
    Pcm16,
    PcmF32,
    /// Needs an `AudioDecoder`
    Vorbis,
}

impl AudioFormat {
    /// Bytes per stored sample, `None` for compressed formats
    pub fn sample_size(self) -> Option<usize> {
        match self {
            AudioFormat::Pcm16 => Some(2),
            AudioFormat::PcmF32 => Some(4),
            AudioFormat::Vorbis => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Readable, Writable)]
pub struct AudioHeader {
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames held by each chunk
    pub samples_per_chunk: Vec<u32>,
    pub streamable: bool,
    /// Positioned in 3-D
    pub is_3d: bool,
}

impl AudioHeader {
    pub fn new(format: AudioFormat, sample_rate: u32, channels: u16, samples_per_chunk: Vec<u32>) -> Self {
        Self {
            format,
            sample_rate,
            channels,
            samples_per_chunk,
            streamable: false,
            is_3d: false,
        }
    }

    pub fn streamable(mut self, streamable: bool) -> Self {
        self.streamable = streamable;
        self
    }

    pub fn spatial(mut self, is_3d: bool) -> Self {
        self.is_3d = is_3d;
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.write_to_vec()?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = Self::read_from_buffer(bytes)?;
        if Writable::<speedy::LittleEndian>::bytes_needed(&header)? != bytes.len() {
            return Err(AssetError::BadCustomData("trailing bytes after audio header".into()));
        }
        Ok(header)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(AssetError::BadCustomData("sample rate is zero".into()));
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(AssetError::BadCustomData(format!(
                "{} channels, allowed 1..={MAX_CHANNELS}",
                self.channels
            )));
        }
        let chunks = self.samples_per_chunk.len();
        if chunks == 0 || chunks > MAX_CHUNKS {
            return Err(AssetError::BadCustomData(format!(
                "{chunks} buffers, allowed 1..={MAX_CHUNKS}"
            )));
        }
        if self.samples_per_chunk.contains(&0) {
            return Err(AssetError::BadCustomData("empty audio buffer".into()));
        }
        Ok(())
    }

    pub fn chunk_count(&self) -> usize {
        self.samples_per_chunk.len()
    }

    pub fn total_frames(&self) -> u64 {
        self.samples_per_chunk.iter().map(|&n| u64::from(n)).sum()
    }

    pub fn duration(&self) -> f32 {
        (self.total_frames() as f64 / f64::from(self.sample_rate.max(1))) as f32
    }

    /// Start time of every buffer plus the clip end, in seconds
    pub fn start_times(&self) -> Vec<f32> {
        let rate = f64::from(self.sample_rate.max(1));
        let mut frames = 0u64;
        let mut times = Vec::with_capacity(self.samples_per_chunk.len() + 1);
        times.push(0.0);
        for &n in &self.samples_per_chunk {
            frames += u64::from(n);
            times.push((frames as f64 / rate) as f32);
        }
        times
    }

    /// Stored byte size of buffer `index`, `None` for compressed formats
    pub fn stored_chunk_size(&self, index: usize) -> Option<usize> {
        let frames = *self.samples_per_chunk.get(index)? as usize;
        Some(frames * self.channels as usize * self.format.sample_size()?)
    }
}

/// Buffer playing at `time`; `timeline` is `start_times()` output
pub fn find_buffer(timeline: &[f32], time: f32) -> Option<usize> {
    if timeline.len() < 2 || time.is_nan() {
        return None;
    }
    let time = time.max(0.0);
    let end = *timeline.last()?;
    if time >= end {
        return None;
    }
    let next = timeline.partition_point(|&start| start <= time);
    Some(next.saturating_sub(1).min(timeline.len() - 2))
}

/// Buffer under `time` and up to `lookahead` buffers after it
pub fn needed_buffers(timeline: &[f32], time: f32, lookahead: usize) -> ChunkMask {
    match find_buffer(timeline, time) {
        Some(index) => {
            let count = timeline.len() - 1;
            ChunkMask::range(index, (index + 1 + lookahead).min(count))
        }
        None => ChunkMask::EMPTY,
    }
}

/// Decoder for compressed audio chunks
pub trait AudioDecoder: Send + Sync {
    fn name(&self) -> &str;

    /// Decode chunk `index` to interleaved little-endian PCM16 with the
    /// header's channel count
    fn decode(&self, header: &AudioHeader, index: usize, bytes: &[u8]) -> Result<Vec<u8>>;
}

fn f32_to_pcm16(bytes: &[u8]) -> Vec<u8> {
    let mut samples = vec![0f32; bytes.len() / 4];
    LittleEndian::read_f32_into(&bytes[..samples.len() * 4], &mut samples);
    let pcm: Vec<i16> = samples
        .iter()
        .map(|s| (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16)
        .collect();
    let mut out = vec![0u8; pcm.len() * 2];
    LittleEndian::write_i16_into(&pcm, &mut out);
    out
}

/// Average interleaved PCM16 frames down to one channel
pub fn downmix_pcm16(bytes: &[u8], channels: u16) -> Vec<u8> {
    let channels = channels.max(1) as usize;
    let mut samples = vec![0i16; bytes.len() / 2];
    LittleEndian::read_i16_into(&bytes[..samples.len() * 2], &mut samples);
    let mono: Vec<i16> = samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
            (sum / channels as i32) as i16
        })
        .collect();
    let mut out = vec![0u8; mono.len() * 2];
    LittleEndian::write_i16_into(&mono, &mut out);
    out
}

#[derive(Clone, Debug, PartialEq)]
pub struct AudioClipData {
    pub header: AudioHeader,
    start_times: Arc<[f32]>,
}

impl AudioClipData {
    pub fn new(header: AudioHeader) -> Self {
        let start_times = header.start_times().into();
        Self {
            header,
            start_times,
        }
    }

    pub fn start_times(&self) -> &Arc<[f32]> {
        &self.start_times
    }

    pub fn buffer_at(&self, time: f32) -> Option<usize> {
        find_buffer(&self.start_times, time)
    }

    pub(crate) fn slot_desc(&self, index: usize) -> Result<SlotDesc> {
        let frames = *self
            .header
            .samples_per_chunk
            .get(index)
            .ok_or_else(|| AssetError::chunk_missing(index, "no such audio buffer"))?;
        Ok(SlotDesc::AudioBuffer(AudioBufferDesc {
            sample_rate: self.header.sample_rate,
            channels: self.header.channels,
            bits_per_sample: 16,
            byte_len: frames as usize * self.header.channels as usize * 2,
        }))
    }

    pub(crate) fn decode_chunk(
        &self,
        index: usize,
        bytes: &Arc<[u8]>,
        ctx: &DecodeContext<'_>,
    ) -> Result<Arc<[u8]>> {
        let header = &self.header;
        if let Some(expected) = header.stored_chunk_size(index) {
            if bytes.len() != expected {
                return Err(AssetError::Decode(format!(
                    "audio buffer {index} holds {} bytes, expected {expected}",
                    bytes.len()
                )));
            }
        }
        let pcm: Arc<[u8]> = match header.format {
            AudioFormat::Pcm16 => Arc::clone(bytes),
            AudioFormat::PcmF32 => f32_to_pcm16(bytes).into(),
            AudioFormat::Vorbis => {
                let decoder = ctx.audio_decoder.ok_or_else(|| {
                    AssetError::Decode("no decoder registered for compressed audio".into())
                })?;
                decoder.decode(header, index, bytes)?.into()
            }
        };
        if header.is_3d && header.channels > 1 && !ctx.spatial_multichannel {
            return Ok(downmix_pcm16(&pcm, header.channels).into());
        }
        Ok(pcm)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AudioClipKind;

impl AssetKind for AudioClipKind {
    fn type_name(&self) -> &'static str {
        AUDIO_TYPE_NAME
    }

    fn init(&self, header: &AssetHeader) -> Result<AssetPayload> {
        let audio = AudioHeader::from_bytes(&header.custom_data)?;
        audio.validate()?;
        for index in 0..audio.chunk_count() {
            let found = header.chunk(index).map_or(0, |c| c.size as usize);
            match audio.stored_chunk_size(index) {
                Some(expected) if expected != found => {
                    return Err(AssetError::BadCustomData(format!(
                        "audio buffer {index} is {found} bytes, expected {expected}"
                    )));
                }
                None if found == 0 => {
                    return Err(AssetError::BadCustomData(format!(
                        "audio buffer {index} is empty"
                    )));
                }
                _ => {}
            }
        }
        Ok(AssetPayload::Audio(AudioClipData::new(audio)))
    }

    fn load(&self, ctx: &mut LoadContext<'_>) -> Result<LoadOutcome> {
        let streamable = ctx
            .payload()
            .as_audio()
            .is_some_and(|a| a.header.streamable);
        ctx.prepare_streaming()?;
        // Streamed clips wait for a play head before touching chunk 0
        if streamable {
            return Ok(LoadOutcome::Streamable);
        }
        ctx.commit_all_chunks()?;
        Ok(LoadOutcome::Resident)
    }
}
