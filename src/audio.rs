use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use hound::{WavSpec, WavWriter};
use log::{debug, warn};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Everything downstream of capture assumes 16 kHz mono.
pub const SAMPLE_RATE: u32 = 16_000;

/// An in-progress capture. Dropping or finishing the handle releases the
/// device; there is no pause/resume.
pub trait CaptureHandle: Send {
    /// Stop capturing and return the samples as 16 kHz mono f32 PCM.
    fn finish(self: Box<Self>) -> Vec<f32>;
}

/// Microphone capability. The engine only ever talks to this trait; tests
/// substitute canned implementations.
pub trait Microphone: Send + Sync {
    fn open(&self) -> Result<Box<dyn CaptureHandle>>;
}

/// cpal-backed microphone using the default input device.
pub struct CpalMicrophone;

impl Microphone for CpalMicrophone {
    fn open(&self) -> Result<Box<dyn CaptureHandle>> {
        CpalCapture::start().map(|c| Box::new(c) as Box<dyn CaptureHandle>)
    }
}

/// The cpal stream is not `Send`, so a dedicated thread owns it for the
/// whole capture and hands the accumulated samples back on join.
struct CpalCapture {
    stop: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<Vec<f32>>>,
}

impl CpalCapture {
    fn start() -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

        let worker = thread::spawn(move || capture_thread(stop_flag, ready_tx));

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => Ok(Self {
                stop,
                worker: Some(worker),
            }),
            Ok(Err(reason)) => {
                let _ = worker.join();
                Err(anyhow!(reason))
            }
            Err(_) => {
                stop.store(true, Ordering::Relaxed);
                let _ = worker.join();
                Err(anyhow!("audio device did not start in time"))
            }
        }
    }
}

impl CaptureHandle for CpalCapture {
    fn finish(mut self: Box<Self>) -> Vec<f32> {
        self.stop.store(true, Ordering::Relaxed);
        match self.worker.take() {
            Some(worker) => worker.join().unwrap_or_default(),
            None => Vec::new(),
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn capture_thread(stop: Arc<AtomicBool>, ready: mpsc::Sender<Result<(), String>>) -> Vec<f32> {
    let host = cpal::default_host();
    let device = match host.default_input_device() {
        Some(d) => d,
        None => {
            let _ = ready.send(Err("no default input device available".to_string()));
            return Vec::new();
        }
    };
    let default_config = match device.default_input_config() {
        Ok(c) => c,
        Err(e) => {
            let _ = ready.send(Err(format!("failed to query input config: {}", e)));
            return Vec::new();
        }
    };
    let format = default_config.sample_format();
    let config: StreamConfig = default_config.into();
    let device_rate = config.sample_rate.0;
    let channels = usize::from(config.channels.max(1));
    debug!(
        "capture config: format={:?} rate={}Hz channels={}",
        format, device_rate, channels
    );

    let buffer = Arc::new(Mutex::new(Vec::<f32>::new()));
    let err_fn = |err| warn!("audio stream error: {}", err);

    let stream = {
        let buffer = buffer.clone();
        let built = match format {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _| {
                    if let Ok(mut buf) = buffer.lock() {
                        downmix_into(&mut buf, data, channels, |s| s);
                    }
                },
                err_fn,
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _| {
                    if let Ok(mut buf) = buffer.lock() {
                        downmix_into(&mut buf, data, channels, |s| s as f32 / 32_768.0);
                    }
                },
                err_fn,
                None,
            ),
            SampleFormat::U16 => device.build_input_stream(
                &config,
                move |data: &[u16], _| {
                    if let Ok(mut buf) = buffer.lock() {
                        downmix_into(&mut buf, data, channels, |s| {
                            (s as f32 - 32_768.0) / 32_768.0
                        });
                    }
                },
                err_fn,
                None,
            ),
            other => {
                let _ = ready.send(Err(format!("unsupported sample format: {:?}", other)));
                return Vec::new();
            }
        };
        match built {
            Ok(s) => s,
            Err(e) => {
                let _ = ready.send(Err(format!("failed to open input stream: {}", e)));
                return Vec::new();
            }
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready.send(Err(format!("failed to start input stream: {}", e)));
        return Vec::new();
    }
    let _ = ready.send(Ok(()));

    while !stop.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(10));
    }

    if let Err(e) = stream.pause() {
        debug!("failed to pause input stream: {}", e);
    }
    drop(stream);

    let samples = buffer.lock().map(|b| b.clone()).unwrap_or_default();
    resample(&samples, device_rate, SAMPLE_RATE)
}

/// Fold interleaved frames down to mono by averaging channels, converting
/// each raw sample to f32 on the way in.
fn downmix_into<T: Copy>(out: &mut Vec<f32>, data: &[T], channels: usize, to_f32: impl Fn(T) -> f32) {
    for frame in data.chunks(channels.max(1)) {
        let sum: f32 = frame.iter().map(|&s| to_f32(s)).sum();
        out.push(sum / frame.len() as f32);
    }
}

/// Linear-interpolation resampler. Good enough for speech headed to a
/// transcription model; a rate match passes through untouched.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let base = pos.floor() as usize;
        let frac = (pos - base as f64) as f32;
        let a = samples[base];
        let b = samples.get(base + 1).copied().unwrap_or(a);
        out.push(a + (b - a) * frac);
    }
    out
}

/// Encode 16 kHz mono f32 samples as a 16-bit PCM WAV file in memory.
pub fn samples_to_wav(samples: &[f32]) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            let amplitude = i16::MAX as f32;
            let clamped = sample.clamp(-1.0, 1.0);
            writer.write_sample((clamped * amplitude) as i16)?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// Microphone double that yields a fixed sample buffer.
    pub struct FixedMicrophone {
        pub samples: Vec<f32>,
    }

    struct FixedCapture(Vec<f32>);

    impl CaptureHandle for FixedCapture {
        fn finish(self: Box<Self>) -> Vec<f32> {
            self.0
        }
    }

    impl Microphone for FixedMicrophone {
        fn open(&self) -> Result<Box<dyn CaptureHandle>> {
            Ok(Box::new(FixedCapture(self.samples.clone())))
        }
    }

    /// Microphone double whose open always fails, as when the device is
    /// claimed by another application.
    pub struct UnavailableMicrophone;

    impl Microphone for UnavailableMicrophone {
        fn open(&self) -> Result<Box<dyn CaptureHandle>> {
            Err(anyhow!("device is busy"))
        }
    }
}
