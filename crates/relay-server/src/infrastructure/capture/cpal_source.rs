//! cpal-based audio capture sources.
//!
//! Uses the cpal crate for cross-platform audio input. Works with
//! PipeWire/PulseAudio/ALSA on Linux, WASAPI on Windows, and CoreAudio on
//! macOS.
//!
//! Note: `cpal::Stream` is not `Send`, so each source runs its stream on a
//! dedicated OS thread and communicates through channels. `start()` resolves
//! the device and waits for the stream to actually open before returning, so
//! a missing or broken device surfaces as a start failure instead of a
//! silently dead stream. `stop()` signals the thread and joins it.
//!
//! # Sample handling
//!
//! Devices are opened at their native configuration; the callback mixes to
//! mono, normalizes to [-1.0, 1.0] (native i16 divides by 32768, exactly the
//! wire contract), and linearly resamples to the source's advertised rate
//! (48 kHz for the microphone, 16 kHz for system loopback). Each hardware
//! callback yields at most one frame; delivery is a non-blocking `try_send`
//! so slow consumers only cost dropped frames, never a stalled callback.

use std::sync::mpsc as std_mpsc;
use std::sync::Mutex;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use relay_core::{normalize_pcm16_samples, AudioFrame, AudioSourceKind};

use super::{CaptureError, CaptureSource};
use crate::application::dispatcher::SignalEvent;

const MIC_SOURCE_NAME: &str = "microphone";
const SYSTEM_SOURCE_NAME: &str = "system-audio";

/// Device-name fragments that identify a loopback ("what you hear") input.
///
/// PipeWire and PulseAudio expose loopback capture as "Monitor of ..."
/// devices; Windows vendor drivers use "Stereo Mix" or "What U Hear".
const LOOPBACK_NAME_HINTS: &[&str] = &["monitor", "loopback", "stereo mix", "what u hear"];

/// The default microphone, captured mono at the configured rate.
pub struct MicrophoneSource {
    events: mpsc::Sender<SignalEvent>,
    target_rate: u32,
    worker: Mutex<Option<StreamWorker>>,
}

impl MicrophoneSource {
    pub fn new(events: mpsc::Sender<SignalEvent>, target_rate: u32) -> Self {
        Self {
            events,
            target_rate,
            worker: Mutex::new(None),
        }
    }
}

impl CaptureSource for MicrophoneSource {
    fn name(&self) -> &'static str {
        MIC_SOURCE_NAME
    }

    fn start(&self) -> Result<(), CaptureError> {
        let mut worker = self.worker.lock().expect("lock poisoned");
        if worker.is_some() {
            return Ok(());
        }
        let device = default_microphone()?;
        *worker = Some(spawn_stream_worker(
            MIC_SOURCE_NAME,
            AudioSourceKind::Mic,
            device,
            self.target_rate,
            self.events.clone(),
        )?);
        Ok(())
    }

    fn stop(&self) {
        stop_worker(&self.worker);
    }
}

/// The system-loopback input, captured mono at the configured rate.
pub struct SystemAudioSource {
    events: mpsc::Sender<SignalEvent>,
    target_rate: u32,
    worker: Mutex<Option<StreamWorker>>,
}

impl SystemAudioSource {
    pub fn new(events: mpsc::Sender<SignalEvent>, target_rate: u32) -> Self {
        Self {
            events,
            target_rate,
            worker: Mutex::new(None),
        }
    }
}

impl CaptureSource for SystemAudioSource {
    fn name(&self) -> &'static str {
        SYSTEM_SOURCE_NAME
    }

    fn start(&self) -> Result<(), CaptureError> {
        let mut worker = self.worker.lock().expect("lock poisoned");
        if worker.is_some() {
            return Ok(());
        }
        let device = find_loopback_device()?;
        *worker = Some(spawn_stream_worker(
            SYSTEM_SOURCE_NAME,
            AudioSourceKind::System,
            device,
            self.target_rate,
            self.events.clone(),
        )?);
        Ok(())
    }

    fn stop(&self) {
        stop_worker(&self.worker);
    }
}

// ── Device resolution ─────────────────────────────────────────────────────────

fn default_microphone() -> Result<cpal::Device, CaptureError> {
    cpal::default_host()
        .default_input_device()
        .ok_or_else(|| CaptureError::DeviceUnavailable {
            source_name: MIC_SOURCE_NAME,
            detail: "no default input device".to_string(),
        })
}

/// Scans the host's input devices for a loopback/monitor capture device.
fn find_loopback_device() -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| CaptureError::DeviceUnavailable {
            source_name: SYSTEM_SOURCE_NAME,
            detail: e.to_string(),
        })?;

    for device in devices {
        if let Ok(name) = device.name() {
            if name_matches_loopback(&name) {
                debug!("using loopback capture device '{name}'");
                return Ok(device);
            }
        }
    }

    Err(CaptureError::DeviceUnavailable {
        source_name: SYSTEM_SOURCE_NAME,
        detail: "no monitor/loopback input device found".to_string(),
    })
}

fn name_matches_loopback(name: &str) -> bool {
    let lower = name.to_lowercase();
    LOOPBACK_NAME_HINTS.iter().any(|hint| lower.contains(hint))
}

// ── Stream worker ─────────────────────────────────────────────────────────────

/// Handle to the dedicated thread owning one cpal stream.
struct StreamWorker {
    stop_tx: std_mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

fn stop_worker(slot: &Mutex<Option<StreamWorker>>) {
    let worker = slot.lock().expect("lock poisoned").take();
    if let Some(worker) = worker {
        // The thread may already have exited on a stream error; both the
        // send and the join are best-effort.
        let _ = worker.stop_tx.send(());
        let _ = worker.handle.join();
    }
}

/// Spawns the capture thread and waits until the stream is playing.
fn spawn_stream_worker(
    source_name: &'static str,
    kind: AudioSourceKind,
    device: cpal::Device,
    target_rate: u32,
    events: mpsc::Sender<SignalEvent>,
) -> Result<StreamWorker, CaptureError> {
    let supported = device
        .default_input_config()
        .map_err(|e| CaptureError::DeviceUnavailable {
            source_name: source_name,
            detail: e.to_string(),
        })?;
    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.config();
    let source_rate = stream_config.sample_rate.0;
    let channels = stream_config.channels as usize;

    debug!(
        "'{source_name}' device config: {source_rate} Hz, {channels} channel(s), {sample_format:?}"
    );

    let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), String>>();
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

    let handle = thread::Builder::new()
        .name(format!("{source_name}-capture"))
        .spawn(move || {
            let stream_result = match sample_format {
                cpal::SampleFormat::I16 => build_pcm16_stream(
                    &device,
                    &stream_config,
                    kind,
                    channels,
                    source_rate,
                    target_rate,
                    events,
                ),
                cpal::SampleFormat::F32 => build_converted_stream::<f32>(
                    &device,
                    &stream_config,
                    kind,
                    channels,
                    source_rate,
                    target_rate,
                    events,
                ),
                cpal::SampleFormat::U16 => build_converted_stream::<u16>(
                    &device,
                    &stream_config,
                    kind,
                    channels,
                    source_rate,
                    target_rate,
                    events,
                ),
                other => Err(format!("unsupported sample format {other:?}")),
            };

            let stream = match stream_result {
                Ok(stream) => stream,
                Err(detail) => {
                    let _ = ready_tx.send(Err(detail));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(e.to_string()));
                return;
            }

            let _ = ready_tx.send(Ok(()));
            info!("'{source_name}' capture started at {target_rate} Hz (device {source_rate} Hz)");

            // Block until stop() signals, or until the source handle is
            // dropped without a signal.
            let _ = stop_rx.recv();
            drop(stream);
            info!("'{source_name}' capture stopped");
        })
        .map_err(|e| CaptureError::Stream {
            source_name: source_name,
            detail: format!("failed to spawn capture thread: {e}"),
        })?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(StreamWorker { stop_tx, handle }),
        Ok(Err(detail)) => {
            let _ = handle.join();
            Err(CaptureError::Stream {
                source_name: source_name,
                detail,
            })
        }
        Err(_) => {
            let _ = handle.join();
            Err(CaptureError::Stream {
                source_name: source_name,
                detail: "capture thread exited before the stream opened".to_string(),
            })
        }
    }
}

/// Builds a stream for a native-i16 device.
///
/// This path normalizes through the shared PCM16 rule (division by 32768) so
/// the wire values match the documented contract bit for bit.
fn build_pcm16_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    kind: AudioSourceKind,
    channels: usize,
    source_rate: u32,
    target_rate: u32,
    events: mpsc::Sender<SignalEvent>,
) -> Result<cpal::Stream, String> {
    device
        .build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let mono = mix_to_mono_i16(data, channels);
                let samples = normalize_pcm16_samples(&mono);
                deliver(kind, samples, source_rate, target_rate, &events);
            },
            move |err| error!("audio stream error: {err}"),
            None,
        )
        .map_err(|e| e.to_string())
}

/// Builds a stream for any other sample format, converting through cpal's
/// sample traits (which use the same i16 scaling internally).
fn build_converted_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    kind: AudioSourceKind,
    channels: usize,
    source_rate: u32,
    target_rate: u32,
    events: mpsc::Sender<SignalEvent>,
) -> Result<cpal::Stream, String>
where
    T: cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mono = mix_to_mono_f32(data, channels);
                deliver(kind, mono, source_rate, target_rate, &events);
            },
            move |err| error!("audio stream error: {err}"),
            None,
        )
        .map_err(|e| e.to_string())
}

/// Packages one callback's samples as a frame and hands it off.
fn deliver(
    kind: AudioSourceKind,
    samples: Vec<f32>,
    source_rate: u32,
    target_rate: u32,
    events: &mpsc::Sender<SignalEvent>,
) {
    let samples = if source_rate == target_rate {
        samples
    } else {
        resample(&samples, source_rate, target_rate)
    };
    if samples.is_empty() {
        return;
    }
    // Fire and forget: when the dispatcher is congested the frame is dropped
    // rather than blocking the hardware callback.
    let _ = events.try_send(SignalEvent::Audio(AudioFrame::new(kind, samples)));
}

/// Averages interleaved i16 channels into a mono signal.
fn mix_to_mono_i16(data: &[i16], channels: usize) -> Vec<i16> {
    let channels = channels.max(1);
    data.chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}

/// Averages interleaved channels into a mono f32 signal.
fn mix_to_mono_f32<T>(data: &[T], channels: usize) -> Vec<f32>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    let channels = channels.max(1);
    data.chunks(channels)
        .map(|frame| {
            let sum: f32 = frame
                .iter()
                .map(|&s| <f32 as cpal::FromSample<T>>::from_sample_(s))
                .sum();
            sum / frame.len() as f32
        })
        .collect()
}

/// Linear-interpolation resampling.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let new_len = (samples.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_idx = i as f64 / ratio;
        let idx = src_idx.floor() as usize;
        let frac = (src_idx - idx as f64) as f32;

        let sample = if idx + 1 < samples.len() {
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        } else {
            samples.get(idx).copied().unwrap_or(0.0)
        };

        output.push(sample);
    }

    output
}

// ── Tests ─────────────────────────────────────────────────────────────────────
