use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::error::PoolError;
use crate::processing::buffer_pool::PooledBuffer;
use crate::timing::clock::MonotonicInstant;

/// Which of the two independently clocked streams a unit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
}

impl StreamKind {
    pub(crate) fn index(self) -> usize {
        match self {
            Self::Video => 0,
            Self::Audio => 1,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => f.write_str("video"),
            Self::Audio => f.write_str("audio"),
        }
    }
}

/// Pixel layout of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Bgra8,
    Rgba8,
    Yuyv422,
    Uyvy422,
    /// 8-bit luma plane followed by an interleaved half-resolution chroma plane.
    Nv12,
}

impl PixelFormat {
    /// Exact byte size of one frame; anything shorter is a partial frame.
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            Self::Bgra8 | Self::Rgba8 => w * h * 4,
            Self::Yuyv422 | Self::Uyvy422 => w * h * 2,
            Self::Nv12 => w * h + 2 * w.div_ceil(2) * h.div_ceil(2),
        }
    }
}

/// Metadata of one captured frame, stamped by the capture adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub timestamp: MonotonicInstant,
    /// Strictly increasing per capture session; gaps mean the source dropped frames.
    pub sequence: u64,
}

impl FrameHeader {
    pub fn expected_len(&self) -> usize {
        self.format.frame_size(self.width, self.height)
    }
}

/// One captured video frame, owning its pool slot while in flight.
#[derive(Debug)]
pub struct VideoUnit {
    pub header: FrameHeader,
    buffer: PooledBuffer<Vec<u8>>,
}

impl VideoUnit {
    pub fn new(header: FrameHeader, buffer: PooledBuffer<Vec<u8>>) -> Self {
        Self { header, buffer }
    }

    pub fn timestamp(&self) -> MonotonicInstant {
        self.header.timestamp
    }

    pub fn sequence(&self) -> u64 {
        self.header.sequence
    }

    pub fn pixels(&self) -> &[u8] {
        self.buffer.data()
    }

    pub fn buffer(&self) -> &PooledBuffer<Vec<u8>> {
        &self.buffer
    }

    pub(crate) fn hand_to_consumer(&mut self) -> Result<(), PoolError> {
        self.buffer.hand_to_consumer()
    }

    /// Return the pixel buffer to its pool.
    pub fn release(self) -> Result<(), PoolError> {
        self.buffer.release()
    }
}

/// Metadata of one audio batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleHeader {
    pub channels: u16,
    pub sample_rate: u32,
    /// Frames per channel in this batch.
    pub sample_count: u32,
    pub timestamp: MonotonicInstant,
    pub sequence: u64,
}

impl SampleHeader {
    pub fn duration_nanos(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        u64::from(self.sample_count) * 1_000_000_000 / u64::from(self.sample_rate)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_nanos(self.duration_nanos())
    }

    /// Where the next contiguous batch should start.
    pub fn expected_next_timestamp(&self) -> MonotonicInstant {
        self.timestamp + self.duration()
    }

    /// Number of interleaved `f32` values in the batch.
    pub fn interleaved_len(&self) -> usize {
        self.sample_count as usize * self.channels as usize
    }
}

/// Payload of an audio unit: captured samples in a pool slot, or synthesized silence.
#[derive(Debug)]
pub enum SampleBuffer {
    Pooled(PooledBuffer<Vec<f32>>),
    Silence,
}

/// One audio batch handed from capture to playback.
#[derive(Debug)]
pub struct AudioUnit {
    pub header: SampleHeader,
    buffer: SampleBuffer,
}

impl AudioUnit {
    pub fn new(header: SampleHeader, buffer: PooledBuffer<Vec<f32>>) -> Self {
        Self {
            header,
            buffer: SampleBuffer::Pooled(buffer),
        }
    }

    /// A silent batch substituted during underrun or degraded mode.
    pub fn silence(header: SampleHeader) -> Self {
        Self {
            header,
            buffer: SampleBuffer::Silence,
        }
    }

    pub fn is_silence(&self) -> bool {
        matches!(self.buffer, SampleBuffer::Silence)
    }

    pub fn duration(&self) -> Duration {
        self.header.duration()
    }

    /// Interleaved samples, or `None` for synthesized silence.
    pub fn samples(&self) -> Option<&[f32]> {
        match &self.buffer {
            SampleBuffer::Pooled(buffer) => Some(buffer.data()),
            SampleBuffer::Silence => None,
        }
    }

    /// Copy the batch into `out`, writing zeros for silence.
    pub fn copy_to(&self, out: &mut Vec<f32>) {
        out.clear();
        match &self.buffer {
            SampleBuffer::Pooled(buffer) => out.extend_from_slice(buffer.data()),
            SampleBuffer::Silence => out.resize(self.header.interleaved_len(), 0.0),
        }
    }

    pub(crate) fn hand_to_consumer(&mut self) -> Result<(), PoolError> {
        match &mut self.buffer {
            SampleBuffer::Pooled(buffer) => buffer.hand_to_consumer(),
            SampleBuffer::Silence => Ok(()),
        }
    }

    /// Return the sample buffer to its pool. Silence owns no slot.
    pub fn release(self) -> Result<(), PoolError> {
        match self.buffer {
            SampleBuffer::Pooled(buffer) => buffer.release(),
            SampleBuffer::Silence => Ok(()),
        }
    }
}

/// How a capture adapter delivers units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceDriver {
    /// The adapter owns a thread that polls or blocks on the device.
    Polling,
    /// The host driver invokes the adapter from its own context.
    Callback,
}

/// Description of the device behind a capture adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub id: String,
    pub name: String,
    pub kind: StreamKind,
    pub driver: SourceDriver,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(sample_count: u32, sample_rate: u32) -> SampleHeader {
        SampleHeader {
            channels: 2,
            sample_rate,
            sample_count,
            timestamp: MonotonicInstant::from_millis(100),
            sequence: 0,
        }
    }

    #[test]
    fn frame_sizes() {
        assert_eq!(PixelFormat::Bgra8.frame_size(4, 2), 32);
        assert_eq!(PixelFormat::Yuyv422.frame_size(4, 2), 16);
        assert_eq!(PixelFormat::Nv12.frame_size(4, 2), 12);
        // odd dimensions round the chroma plane up
        assert_eq!(PixelFormat::Nv12.frame_size(3, 3), 9 + 2 * 2 * 2);
    }

    #[test]
    fn batch_duration_and_next_timestamp() {
        let h = header(480, 48_000);
        assert_eq!(h.duration(), Duration::from_millis(10));
        assert_eq!(h.expected_next_timestamp(), MonotonicInstant::from_millis(110));
        assert_eq!(h.interleaved_len(), 960);
    }

    #[test]
    fn zero_rate_has_zero_duration() {
        assert_eq!(header(480, 0).duration(), Duration::ZERO);
    }

    #[test]
    fn silence_copies_as_zeros() {
        let unit = AudioUnit::silence(header(4, 48_000));
        let mut out = vec![1.0; 3];
        unit.copy_to(&mut out);
        assert_eq!(out, vec![0.0; 8]);
        assert!(unit.samples().is_none());
        assert!(unit.release().is_ok());
    }
}
