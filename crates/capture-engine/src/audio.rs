//! Audio capture: device selection, chunked accumulation and WAV output.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Sample;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use capturer_common::error::{CapturerError, CapturerResult};

/// How long one read waits for the device before re-checking the stop flag.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// PCM layout of the recorded audio (always signed 16-bit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub fn seconds(&self, samples: usize) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        samples as f64 / (self.sample_rate as f64 * self.channels as f64)
    }
}

/// Name and input capability of an audio device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDeviceInfo {
    pub name: String,
    pub max_input_channels: u16,
}

/// Device-name fragments preferred on each platform family.
pub fn preferred_device_keywords(os: &str) -> &'static [&'static str] {
    match os {
        "windows" => &["microphone"],
        "linux" => &["pipewire", "pulse"],
        _ => &[],
    }
}

/// Pick the input device to record from.
///
/// A device whose name contains one of the platform's preferred keywords
/// wins, in keyword order; otherwise the first device with input channels.
pub fn select_input_device(devices: &[InputDeviceInfo], os: &str) -> Option<usize> {
    let usable = |d: &InputDeviceInfo| d.max_input_channels > 0;

    for keyword in preferred_device_keywords(os) {
        let found = devices
            .iter()
            .position(|d| usable(d) && d.name.to_lowercase().contains(keyword));
        if found.is_some() {
            return found;
        }
    }
    devices.iter().position(usable)
}

/// Enumerate input devices of the default host.
pub fn list_input_devices() -> CapturerResult<Vec<InputDeviceInfo>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| CapturerError::audio(format!("Failed to enumerate input devices: {e}")))?;
    Ok(devices.map(|device| describe(&device)).collect())
}

fn describe(device: &cpal::Device) -> InputDeviceInfo {
    let name = device.name().unwrap_or_else(|_| "<unnamed>".to_string());
    let max_input_channels = device
        .supported_input_configs()
        .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
        .unwrap_or(0);
    InputDeviceInfo {
        name,
        max_input_channels,
    }
}

/// Where the audio worker reads samples from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioInput {
    /// The device chosen by [`select_input_device`].
    #[default]
    Device,
    /// A generated tone.
    Tone,
    /// Nothing to open, as on a machine without input devices.
    Absent,
}

/// Open the source for `input`, or `None` when there is no usable device.
pub fn open_audio_source(
    input: AudioInput,
    requested: AudioFormat,
) -> CapturerResult<Option<Box<dyn AudioSource>>> {
    match input {
        AudioInput::Device => Ok(CpalAudioSource::open_default(requested)?
            .map(|s| Box::new(s) as Box<dyn AudioSource>)),
        AudioInput::Tone => Ok(Some(Box::new(ToneAudioSource::new(requested)))),
        AudioInput::Absent => Ok(None),
    }
}

/// A stream of interleaved 16-bit samples.
pub trait AudioSource {
    fn format(&self) -> AudioFormat;

    /// Next batch of samples, or `None` if nothing arrived within `timeout`.
    fn read(&mut self, timeout: Duration) -> CapturerResult<Option<Vec<i16>>>;

    /// Release the device.
    fn close(&mut self);

    fn name(&self) -> &str;
}

/// Input stream on a cpal device.
pub struct CpalAudioSource {
    stream: Option<cpal::Stream>,
    samples: Receiver<Vec<i16>>,
    format: AudioFormat,
    device_name: String,
}

impl CpalAudioSource {
    /// Open the device chosen by [`select_input_device`].
    ///
    /// Returns `Ok(None)` when the system has no usable input device.
    pub fn open_default(requested: AudioFormat) -> CapturerResult<Option<Self>> {
        let host = cpal::default_host();
        let devices: Vec<cpal::Device> = match host.input_devices() {
            Ok(devices) => devices.collect(),
            Err(e) => {
                warn!(error = %e, "Failed to enumerate input devices");
                return Ok(None);
            }
        };
        let infos: Vec<InputDeviceInfo> = devices.iter().map(describe).collect();
        let Some(index) = select_input_device(&infos, std::env::consts::OS) else {
            return Ok(None);
        };
        let device = &devices[index];
        info!(device = %infos[index].name, "Selected audio input device");
        Self::open(device, &infos[index].name, requested).map(Some)
    }

    fn open(device: &cpal::Device, name: &str, requested: AudioFormat) -> CapturerResult<Self> {
        let default = device
            .default_input_config()
            .map_err(|e| CapturerError::audio(format!("No input config for {name}: {e}")))?;
        let sample_format = default.sample_format();

        let wanted = cpal::StreamConfig {
            channels: requested.channels,
            sample_rate: cpal::SampleRate(requested.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (tx, rx) = crossbeam_channel::unbounded();
        let (stream, config) = match build_stream(device, &wanted, sample_format, tx.clone()) {
            Ok(stream) => (stream, wanted),
            Err(e) => {
                let fallback = default.config();
                warn!(
                    error = %e,
                    sample_rate = fallback.sample_rate.0,
                    channels = fallback.channels,
                    "Requested audio format unsupported; using device default"
                );
                let stream = build_stream(device, &fallback, sample_format, tx)?;
                (stream, fallback)
            }
        };

        stream
            .play()
            .map_err(|e| CapturerError::audio(format!("Failed to start input stream: {e}")))?;

        Ok(Self {
            stream: Some(stream),
            samples: rx,
            format: AudioFormat {
                sample_rate: config.sample_rate.0,
                channels: config.channels,
            },
            device_name: name.to_string(),
        })
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    format: cpal::SampleFormat,
    tx: crossbeam_channel::Sender<Vec<i16>>,
) -> CapturerResult<cpal::Stream> {
    match format {
        cpal::SampleFormat::I16 => build_typed::<i16>(device, config, tx),
        cpal::SampleFormat::U16 => build_typed::<u16>(device, config, tx),
        cpal::SampleFormat::I32 => build_typed::<i32>(device, config, tx),
        cpal::SampleFormat::F32 => build_typed::<f32>(device, config, tx),
        other => Err(CapturerError::audio(format!(
            "Unsupported device sample format {other:?}"
        ))),
    }
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    tx: crossbeam_channel::Sender<Vec<i16>>,
) -> CapturerResult<cpal::Stream>
where
    T: cpal::SizedSample + Send + 'static,
    i16: cpal::FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let chunk: Vec<i16> = data.iter().map(|s| i16::from_sample(*s)).collect();
                let _ = tx.send(chunk);
            },
            |err| warn!(error = %err, "Audio input stream error"),
            None,
        )
        .map_err(|e| CapturerError::audio(format!("Failed to open input stream: {e}")))
}

impl AudioSource for CpalAudioSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn read(&mut self, timeout: Duration) -> CapturerResult<Option<Vec<i16>>> {
        match self.samples.recv_timeout(timeout) {
            Ok(chunk) => Ok(Some(chunk)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(CapturerError::audio("Audio input stream closed"))
            }
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
        }
    }

    fn name(&self) -> &str {
        &self.device_name
    }
}

/// A 440 Hz tone paced by the wall clock, for recordings without a device.
pub struct ToneAudioSource {
    format: AudioFormat,
    started: Instant,
    emitted_frames: u64,
}

impl ToneAudioSource {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            started: Instant::now(),
            emitted_frames: 0,
        }
    }
}

impl AudioSource for ToneAudioSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn read(&mut self, timeout: Duration) -> CapturerResult<Option<Vec<i16>>> {
        std::thread::sleep(timeout.min(Duration::from_millis(20)));
        let due = (self.started.elapsed().as_secs_f64() * self.format.sample_rate as f64) as u64;
        if due <= self.emitted_frames {
            return Ok(None);
        }
        let channels = self.format.channels.max(1) as usize;
        let mut chunk = Vec::with_capacity((due - self.emitted_frames) as usize * channels);
        for n in self.emitted_frames..due {
            let t = n as f64 / self.format.sample_rate as f64;
            let value = ((t * 440.0 * std::f64::consts::TAU).sin() * 8000.0) as i16;
            chunk.extend(std::iter::repeat(value).take(channels));
        }
        self.emitted_frames = due;
        Ok(Some(chunk))
    }

    fn close(&mut self) {}

    fn name(&self) -> &str {
        "tone"
    }
}

/// In-memory store of fixed-size sample chunks.
#[derive(Debug, Clone)]
pub struct AudioAccumulator {
    chunk_len: usize,
    chunks: Vec<Vec<i16>>,
    pending: Vec<i16>,
}

impl AudioAccumulator {
    /// `chunk_frames` frames of `channels` samples each per chunk.
    pub fn new(chunk_frames: u32, channels: u16) -> Self {
        let chunk_len = (chunk_frames.max(1) as usize) * (channels.max(1) as usize);
        Self {
            chunk_len,
            chunks: Vec::new(),
            pending: Vec::with_capacity(chunk_len),
        }
    }

    pub fn push(&mut self, mut samples: &[i16]) {
        while !samples.is_empty() {
            let take = (self.chunk_len - self.pending.len()).min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];
            if self.pending.len() == self.chunk_len {
                let full = std::mem::replace(&mut self.pending, Vec::with_capacity(self.chunk_len));
                self.chunks.push(full);
            }
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn sample_count(&self) -> usize {
        self.chunks.len() * self.chunk_len + self.pending.len()
    }

    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.chunks
            .iter()
            .flatten()
            .chain(self.pending.iter())
            .copied()
    }
}

/// Read from `source` until `stop` is set, then close it.
pub fn run_audio_loop(
    source: &mut dyn AudioSource,
    stop: &AtomicBool,
    chunk_frames: u32,
) -> CapturerResult<AudioAccumulator> {
    let format = source.format();
    let mut acc = AudioAccumulator::new(chunk_frames, format.channels);
    info!(
        source = source.name(),
        sample_rate = format.sample_rate,
        channels = format.channels,
        "Audio capture started"
    );

    let result = loop {
        if stop.load(Ordering::SeqCst) {
            break Ok(());
        }
        match source.read(READ_TIMEOUT) {
            Ok(Some(chunk)) => acc.push(&chunk),
            Ok(None) => debug!("No audio within read timeout"),
            Err(e) => break Err(e),
        }
    };
    source.close();
    result?;

    info!(
        chunks = acc.chunk_count(),
        seconds = format.seconds(acc.sample_count()),
        "Audio capture stopped"
    );
    Ok(acc)
}

/// Write all accumulated samples to a 16-bit PCM WAV file in one pass.
///
/// Returns the audio duration in seconds.
pub fn write_wav(path: &Path, format: AudioFormat, acc: &AudioAccumulator) -> CapturerResult<f64> {
    let spec = hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| CapturerError::audio(format!("Failed to create {}: {e}", path.display())))?;
    for sample in acc.samples() {
        writer
            .write_sample(sample)
            .map_err(|e| CapturerError::audio(format!("Failed to write audio: {e}")))?;
    }
    writer
        .finalize()
        .map_err(|e| CapturerError::audio(format!("Failed to finalize audio: {e}")))?;
    Ok(format.seconds(acc.sample_count()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str, channels: u16) -> InputDeviceInfo {
        InputDeviceInfo {
            name: name.to_string(),
            max_input_channels: channels,
        }
    }

    #[test]
    fn test_windows_prefers_microphone() {
        let devices = vec![
            device("Stereo Mix", 2),
            device("Microphone (Realtek Audio)", 2),
        ];
        assert_eq!(select_input_device(&devices, "windows"), Some(1));
    }

    #[test]
    fn test_linux_prefers_sound_server() {
        let devices = vec![
            device("hw:CARD=PCH,DEV=0", 2),
            device("pulse", 32),
            device("pipewire", 64),
        ];
        assert_eq!(select_input_device(&devices, "linux"), Some(2));
    }

    #[test]
    fn test_fallback_skips_output_only_devices() {
        let devices = vec![device("HDMI Out", 0), device("USB Mic", 1)];
        assert_eq!(select_input_device(&devices, "macos"), Some(1));
        assert_eq!(select_input_device(&devices, "linux"), Some(1));
    }

    #[test]
    fn test_keyword_match_requires_input_channels() {
        let devices = vec![device("pulse monitor", 0), device("default", 2)];
        assert_eq!(select_input_device(&devices, "linux"), Some(1));
        assert_eq!(select_input_device(&[device("x", 0)], "linux"), None);
    }

    #[test]
    fn test_absent_input_opens_nothing() {
        let format = AudioFormat {
            sample_rate: 8000,
            channels: 1,
        };
        assert!(open_audio_source(AudioInput::Absent, format).unwrap().is_none());
        let tone = open_audio_source(AudioInput::Tone, format).unwrap().unwrap();
        assert_eq!(tone.format(), format);
    }

    #[test]
    fn test_accumulator_splits_into_fixed_chunks() {
        let mut acc = AudioAccumulator::new(4, 2);
        acc.push(&[1; 5]);
        acc.push(&[2; 12]);
        assert_eq!(acc.chunk_count(), 2);
        assert_eq!(acc.sample_count(), 17);
        let samples: Vec<i16> = acc.samples().collect();
        assert_eq!(&samples[..5], &[1; 5]);
        assert_eq!(&samples[5..], &[2; 12]);
    }

    struct ScriptedSource {
        reads: Vec<Vec<i16>>,
        stop: std::sync::Arc<AtomicBool>,
        closed: bool,
    }

    impl AudioSource for ScriptedSource {
        fn format(&self) -> AudioFormat {
            AudioFormat {
                sample_rate: 8000,
                channels: 1,
            }
        }

        fn read(&mut self, _timeout: Duration) -> CapturerResult<Option<Vec<i16>>> {
            let next = self.reads.pop();
            if self.reads.is_empty() {
                self.stop.store(true, Ordering::SeqCst);
            }
            Ok(next)
        }

        fn close(&mut self) {
            self.closed = true;
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    #[test]
    fn test_audio_loop_writes_wav_of_expected_length() {
        let stop = std::sync::Arc::new(AtomicBool::new(false));
        let mut source = ScriptedSource {
            reads: vec![vec![100; 4000]; 4],
            stop: stop.clone(),
            closed: false,
        };
        let acc = run_audio_loop(&mut source, &stop, 1024).unwrap();
        assert!(source.closed);
        assert_eq!(acc.sample_count(), 16_000);

        let path = std::env::temp_dir().join(format!("capturer-audio-{}.wav", std::process::id()));
        let seconds = write_wav(&path, source.format(), &acc).unwrap();
        assert!((seconds - 2.0).abs() < 1e-9);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.len(), 16_000);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_tone_source_is_paced_by_wall_clock() {
        let mut tone = ToneAudioSource::new(AudioFormat {
            sample_rate: 8000,
            channels: 2,
        });
        let mut total = 0usize;
        let started = Instant::now();
        while started.elapsed() < Duration::from_millis(200) {
            if let Some(chunk) = tone.read(Duration::from_millis(10)).unwrap() {
                total += chunk.len();
            }
        }
        let seconds = tone.format().seconds(total);
        assert!(seconds > 0.1 && seconds < 0.3, "got {seconds}s");
    }
}
