//! Incremental WAV recording.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::{Error, Result};

/// Appends mono float32 blocks to a WAV file.
///
/// The file stays open across blocks; [`finalize`](Self::finalize) patches
/// the header and closes it. Dropping an unfinalized sink finalizes it on a
/// best-effort basis.
pub struct WavSink {
    writer: Option<WavWriter<BufWriter<File>>>,
    path: PathBuf,
}

impl WavSink {
    /// Creates (or truncates) a mono 32-bit float WAV file at the engine's
    /// sample rate.
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let writer = WavWriter::create(&path, spec)?;
        tracing::info!(path = %path.display(), sample_rate, "wav sink opened");
        Ok(Self {
            writer: Some(writer),
            path,
        })
    }

    /// Path the sink writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one block of samples.
    pub fn write_block(&mut self, samples: &[f32]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::Stream("wav sink already finalized".into()))?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        Ok(())
    }

    /// Patches the WAV header and closes the file. Idempotent.
    pub fn finalize(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
            tracing::info!(path = %self.path.display(), "wav sink finalized");
        }
        Ok(())
    }
}

impl Drop for WavSink {
    fn drop(&mut self) {
        let _ = self.finalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::WavReader;
    use tempfile::tempdir;

    #[test]
    fn test_blocks_append_and_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.wav");

        let mut sink = WavSink::create(&path, 44100).unwrap();
        let first: Vec<f32> = (0..256).map(|i| i as f32 / 256.0).collect();
        let second: Vec<f32> = (0..256).map(|i| -(i as f32) / 256.0).collect();
        sink.write_block(&first).unwrap();
        sink.write_block(&second).unwrap();
        sink.finalize().unwrap();

        let mut reader = WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 44100);
        assert_eq!(spec.sample_format, SampleFormat::Float);

        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 512);
        for (a, b) in first.iter().chain(&second).zip(&samples) {
            assert!((a - b).abs() < 1e-7);
        }
    }

    #[test]
    fn test_write_after_finalize_fails() {
        let dir = tempdir().unwrap();
        let mut sink = WavSink::create(dir.path().join("x.wav"), 48000).unwrap();
        sink.finalize().unwrap();
        assert!(sink.write_block(&[0.0; 4]).is_err());
        // A second finalize is a no-op.
        sink.finalize().unwrap();
    }
}
