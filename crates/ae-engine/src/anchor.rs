//! Anchor audio
//!
//! `AnchorClip` is immutable mono PCM shared by `Arc`; each voice reads it
//! through its own `AnchorCursor` one block at a time.

use ae_core::{AeError, AeResult, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE, Sample};
use std::sync::Arc;

/// Clean anchor recording (mono)
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorClip {
    samples: Box<[Sample]>,
    sample_rate: u32,
}

impl AnchorClip {
    pub fn new(samples: Vec<Sample>, sample_rate: u32) -> AeResult<Self> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
            return Err(AeError::InvalidParam(format!("anchor sample rate {} Hz", sample_rate)));
        }
        if samples.is_empty() {
            return Err(AeError::InvalidParam("anchor clip is empty".to_string()));
        }
        let mut samples = samples.into_boxed_slice();
        for s in samples.iter_mut() {
            if !s.is_finite() {
                *s = 0.0;
            }
        }
        Ok(Self { samples, sample_rate })
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Read position over a shared clip
#[derive(Debug, Clone, Default)]
pub struct AnchorCursor {
    clip: Option<Arc<AnchorClip>>,
    position: usize,
    looping: bool,
}

impl AnchorCursor {
    pub fn new(clip: Arc<AnchorClip>, looping: bool) -> Self {
        Self {
            clip: Some(clip),
            position: 0,
            looping,
        }
    }

    /// Attach a clip, returning the previous one
    pub fn attach(&mut self, clip: Arc<AnchorClip>, looping: bool) -> Option<Arc<AnchorClip>> {
        self.position = 0;
        self.looping = looping;
        self.clip.replace(clip)
    }

    /// Detach the clip (the caller decides where it is dropped)
    pub fn detach(&mut self) -> Option<Arc<AnchorClip>> {
        self.position = 0;
        self.clip.take()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// True once a non-looping clip has been read to the end
    pub fn is_finished(&self) -> bool {
        match &self.clip {
            Some(clip) => !self.looping && self.position >= clip.len(),
            None => true,
        }
    }

    /// Fill `out` with the next samples; zero-fills past the end
    pub fn read_block(&mut self, out: &mut [Sample]) {
        let Some(clip) = &self.clip else {
            out.fill(0.0);
            return;
        };
        let src = clip.samples();
        let mut written = 0;
        while written < out.len() {
            if self.position >= src.len() {
                if self.looping {
                    self.position = 0;
                } else {
                    out[written..].fill(0.0);
                    return;
                }
            }
            let n = (src.len() - self.position).min(out.len() - written);
            out[written..written + n].copy_from_slice(&src[self.position..self.position + n]);
            self.position += n;
            written += n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(len: usize) -> Arc<AnchorClip> {
        Arc::new(AnchorClip::new((0..len).map(|i| i as f64 + 1.0).collect(), 48000).unwrap())
    }

    #[test]
    fn test_reads_then_zero_fills() {
        let mut cursor = AnchorCursor::new(clip(5), false);
        let mut block = [9.0; 4];
        cursor.read_block(&mut block);
        assert_eq!(block, [1.0, 2.0, 3.0, 4.0]);
        cursor.read_block(&mut block);
        assert_eq!(block, [5.0, 0.0, 0.0, 0.0]);
        assert!(cursor.is_finished());
    }

    #[test]
    fn test_looping_wraps() {
        let mut cursor = AnchorCursor::new(clip(3), true);
        let mut block = [0.0; 7];
        cursor.read_block(&mut block);
        assert_eq!(block, [1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 1.0]);
        assert!(!cursor.is_finished());
    }

    #[test]
    fn test_rejects_bad_clips() {
        assert!(AnchorClip::new(vec![], 48000).is_err());
        assert!(AnchorClip::new(vec![0.0; 10], 1000).is_err());
        let cleaned = AnchorClip::new(vec![f64::NAN, 0.5], 48000).unwrap();
        assert_eq!(cleaned.samples(), &[0.0, 0.5]);
    }
}
