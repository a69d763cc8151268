/*
 * @file audio.rs
 * @brief Microphone phrase capture and WAV helpers for Talkback
 * @author Kevin Thomas
 * @date 2025
 *
 * MIT License
 *
 * Copyright (c) 2025 Kevin Thomas
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy
 * of this software and associated documentation files (the "Software"), to deal
 * in the Software without restriction, including without limitation the rights
 * to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
 * copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in all
 * copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
 * OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
 * SOFTWARE.
 */

//! Audio recording functionality.
//!
//! This module records one spoken phrase from the default input device using
//! CPAL, deciding where the phrase starts and ends from signal energy, and
//! encodes the result as WAV for transcription.

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig, StreamError};
use hound::{WavSpec, WavWriter};
use tracing::{debug, warn};

/// Sample rate for audio recording (16kHz).
///
/// Value is expressed in Hertz and matches Whisper's preferred input rate.
pub const SAMPLE_RATE: u32 = 16000;

/// Number of audio channels (mono).
const CHANNELS: u16 = 1;

/// Bits per sample for WAV encoding.
const BITS_PER_SAMPLE: u16 = 16;

/// Samples examined per energy decision.
pub const CHUNK_SAMPLES: usize = 1024;

/// How long the ambient-noise calibration listens before capture starts.
const CALIBRATION_DURATION: Duration = Duration::from_secs(1);

/// Energy threshold used before any calibration has happened.
const INITIAL_ENERGY_THRESHOLD: f32 = 300.0;

/// Fraction of the previous threshold kept after one second of adjustment.
const DYNAMIC_DAMPING: f32 = 0.15;

/// Ambient energy is multiplied by this ratio to form the speech threshold.
const DYNAMIC_RATIO: f32 = 1.5;

/// Minimum seconds of speaking audio for a capture to count as a phrase.
const PHRASE_THRESHOLD_SECS: f32 = 0.3;

/// Seconds of quiet audio kept on both sides of a phrase.
const NON_SPEAKING_SECS: f32 = 0.5;

/// Longest silence tolerated from the device before giving up on a chunk.
const DEVICE_STALL: Duration = Duration::from_secs(2);

/// Timing limits for one phrase capture.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CaptureSettings {
    /// How long to wait for speech to start.
    pub timeout: Duration,
    /// Longest phrase recorded once speech has started.
    pub phrase_time_limit: Duration,
    /// Silence that ends a phrase.
    pub pause_threshold: Duration,
}

/// What one capture produced.
#[derive(Debug, PartialEq)]
pub enum CaptureOutcome {
    /// PCM samples of the captured phrase.
    Phrase(Vec<i16>),
    /// No speech started before the timeout elapsed.
    TimedOut,
}

/// Decision after feeding a chunk to [`PhraseDetector`].
#[derive(Debug, PartialEq)]
pub enum DetectorStep {
    Continue,
    Done(CaptureOutcome),
}

/// Root-mean-square energy of a PCM chunk.
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy = samples
        .iter()
        .map(|sample| (*sample as f32).powi(2))
        .sum::<f32>()
        / samples.len() as f32;
    energy.sqrt()
}

/// Seconds of audio held by one chunk of [`CHUNK_SAMPLES`].
fn seconds_per_chunk() -> f32 {
    CHUNK_SAMPLES as f32 / SAMPLE_RATE as f32
}

fn chunks_for(seconds: f32) -> usize {
    (seconds / seconds_per_chunk()).ceil() as usize
}

/// Speech/silence threshold that follows the ambient noise level.
#[derive(Clone, Copy, Debug)]
pub struct EnergyThreshold {
    value: f32,
}

impl Default for EnergyThreshold {
    fn default() -> Self {
        Self {
            value: INITIAL_ENERGY_THRESHOLD,
        }
    }
}

impl EnergyThreshold {
    pub fn value(&self) -> f32 {
        self.value
    }

    /// Moves the threshold toward `DYNAMIC_RATIO` times the chunk energy.
    pub fn adjust(&mut self, energy: f32) {
        let damping = DYNAMIC_DAMPING.powf(seconds_per_chunk());
        let target = energy * DYNAMIC_RATIO;
        self.value = self.value * damping + target * (1.0 - damping);
    }

    pub fn is_speech(&self, energy: f32) -> bool {
        energy > self.value
    }
}

#[derive(Debug)]
enum Phase {
    Waiting,
    Recording,
}

/// Energy-based segmentation of one phrase out of a stream of chunks.
///
/// # Details
/// While waiting, the last half second of audio is kept so the phrase does
/// not start clipped, and the threshold keeps tracking ambient noise. Once a
/// chunk crosses the threshold, chunks are recorded until the pause threshold
/// of consecutive quiet chunks or the phrase time limit is reached. Captures
/// with too little speaking audio are discarded and waiting resumes.
#[derive(Debug)]
pub struct PhraseDetector {
    threshold: EnergyThreshold,
    settings: CaptureSettings,
    phase: Phase,
    waited: f32,
    phrase_time: f32,
    pause_count: usize,
    phrase_count: usize,
    buffer: VecDeque<Vec<i16>>,
}

impl PhraseDetector {
    pub fn new(threshold: EnergyThreshold, settings: CaptureSettings) -> Self {
        Self {
            threshold,
            settings,
            phase: Phase::Waiting,
            waited: 0.0,
            phrase_time: 0.0,
            pause_count: 0,
            phrase_count: 0,
            buffer: VecDeque::new(),
        }
    }

    fn pause_chunks(&self) -> usize {
        chunks_for(self.settings.pause_threshold.as_secs_f32()).max(1)
    }

    /// Consumes one chunk and reports whether the capture is finished.
    pub fn feed(&mut self, chunk: Vec<i16>) -> DetectorStep {
        let energy = rms(&chunk);
        match self.phase {
            Phase::Waiting => self.feed_waiting(chunk, energy),
            Phase::Recording => self.feed_recording(chunk, energy),
        }
    }

    fn feed_waiting(&mut self, chunk: Vec<i16>, energy: f32) -> DetectorStep {
        self.waited += seconds_per_chunk();
        if self.waited > self.settings.timeout.as_secs_f32() {
            return DetectorStep::Done(CaptureOutcome::TimedOut);
        }
        self.buffer.push_back(chunk);
        if self.buffer.len() > chunks_for(NON_SPEAKING_SECS) {
            self.buffer.pop_front();
        }
        if self.threshold.is_speech(energy) {
            debug!(energy, threshold = self.threshold.value(), "speech started");
            self.phase = Phase::Recording;
            self.phrase_time = 0.0;
            self.pause_count = 0;
            self.phrase_count = 1;
        } else {
            self.threshold.adjust(energy);
        }
        DetectorStep::Continue
    }

    fn feed_recording(&mut self, chunk: Vec<i16>, energy: f32) -> DetectorStep {
        self.buffer.push_back(chunk);
        self.phrase_count += 1;
        self.phrase_time += seconds_per_chunk();
        if self.threshold.is_speech(energy) {
            self.pause_count = 0;
        } else {
            self.pause_count += 1;
        }
        let limit_hit = self.phrase_time > self.settings.phrase_time_limit.as_secs_f32();
        if !limit_hit && self.pause_count <= self.pause_chunks() {
            return DetectorStep::Continue;
        }
        let speaking = self.phrase_count.saturating_sub(self.pause_count);
        if speaking < chunks_for(PHRASE_THRESHOLD_SECS) && !limit_hit {
            debug!(speaking, "discarding short noise burst");
            self.phase = Phase::Waiting;
            self.buffer.clear();
            return DetectorStep::Continue;
        }
        DetectorStep::Done(CaptureOutcome::Phrase(self.finish()))
    }

    /// Flattens the recorded chunks, trimming surplus trailing silence.
    fn finish(&mut self) -> Vec<i16> {
        let surplus = self.pause_count.saturating_sub(chunks_for(NON_SPEAKING_SECS));
        let keep = self.buffer.len().saturating_sub(surplus);
        self.buffer.drain(..).take(keep).flatten().collect()
    }
}

/// Regroups arbitrarily sized device callbacks into fixed-size chunks.
#[derive(Debug, Default)]
struct ChunkAssembler {
    pending: Vec<i16>,
}

impl ChunkAssembler {
    fn push(&mut self, data: &[i16]) -> Vec<Vec<i16>> {
        self.pending.extend_from_slice(data);
        let mut ready = Vec::new();
        while self.pending.len() >= CHUNK_SAMPLES {
            let rest = self.pending.split_off(CHUNK_SAMPLES);
            ready.push(std::mem::replace(&mut self.pending, rest));
        }
        ready
    }
}

/// Records one phrase from the default input device.
///
/// # Details
/// Blocks the calling thread: one second of ambient-noise calibration, then
/// waits up to `settings.timeout` for speech and records until the phrase
/// ends. Run it on a blocking thread from async code.
///
/// # Errors
/// Returns an error if no input device is available, the stream cannot be
/// created or started, or the device stops delivering audio.
pub fn record_phrase(settings: CaptureSettings) -> Result<CaptureOutcome> {
    let device = default_input_device()?;
    let (tx, rx) = mpsc::channel();
    let stream = build_input_stream(&device, &input_config(), tx)?;
    stream.play().with_context(|| "Failed to start input stream")?;
    let outcome = capture(&mut ChunkReader::new(rx), settings);
    drop(stream);
    outcome
}

/// Calibrates on `chunks` and then segments one phrase out of them.
fn capture(chunks: &mut ChunkReader, settings: CaptureSettings) -> Result<CaptureOutcome> {
    let threshold = calibrate(chunks)?;
    debug!(threshold = threshold.value(), "ambient noise calibrated");
    let mut detector = PhraseDetector::new(threshold, settings);
    loop {
        let Some(chunk) = chunks.next_chunk() else {
            anyhow::bail!("Input device stopped delivering audio");
        };
        if let DetectorStep::Done(outcome) = detector.feed(chunk) {
            return Ok(outcome);
        }
    }
}

/// Listens to ambient noise and derives the starting speech threshold.
///
/// # Errors
/// Returns an error if the device delivers no audio at all.
fn calibrate(chunks: &mut ChunkReader) -> Result<EnergyThreshold> {
    let mut threshold = EnergyThreshold::default();
    let mut heard = 0;
    for _ in 0..chunks_for(CALIBRATION_DURATION.as_secs_f32()) {
        match chunks.next_chunk() {
            Some(chunk) => {
                threshold.adjust(rms(&chunk));
                heard += 1;
            }
            None => break,
        }
    }
    if heard == 0 {
        anyhow::bail!("Input device delivered no audio during calibration");
    }
    Ok(threshold)
}

/// Pulls fixed-size chunks out of the device channel.
struct ChunkReader {
    rx: Receiver<Vec<i16>>,
    assembler: ChunkAssembler,
    ready: VecDeque<Vec<i16>>,
}

impl ChunkReader {
    fn new(rx: Receiver<Vec<i16>>) -> Self {
        Self {
            rx,
            assembler: ChunkAssembler::default(),
            ready: VecDeque::new(),
        }
    }

    fn next_chunk(&mut self) -> Option<Vec<i16>> {
        while self.ready.is_empty() {
            match self.rx.recv_timeout(DEVICE_STALL) {
                Ok(data) => self.ready.extend(self.assembler.push(&data)),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return None
                }
            }
        }
        self.ready.pop_front()
    }
}

/// Encodes PCM samples as an in-memory 16 kHz mono WAV file.
///
/// # Errors
/// Returns an error if the WAV writer fails.
pub fn encode_wav(samples: &[i16]) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: CHANNELS,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: BITS_PER_SAMPLE,
        sample_format: hound::SampleFormat::Int,
    };
    let mut bytes = Vec::new();
    {
        let mut writer = WavWriter::new(Cursor::new(&mut bytes), spec)
            .with_context(|| "Failed to start WAV encoding")?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(bytes)
}

/// Locates the system default input device.
///
/// # Errors
/// Returns an error when the user has no available microphone.
fn default_input_device() -> Result<Device> {
    cpal::default_host()
        .default_input_device()
        .ok_or_else(|| anyhow::anyhow!("No input device"))
}

/// Builds the CPAL stream configuration used by the recorder.
fn input_config() -> StreamConfig {
    StreamConfig {
        channels: CHANNELS,
        sample_rate: cpal::SampleRate(SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    }
}

/// Builds the CPAL input stream, forwarding converted samples to `tx`.
fn build_input_stream(
    device: &Device,
    config: &StreamConfig,
    tx: Sender<Vec<i16>>,
) -> Result<Stream> {
    device
        .build_input_stream(
            config,
            move |data: &[f32], _: &_| {
                let _ = tx.send(convert_samples(data));
            },
            log_stream_error,
            None,
        )
        .map_err(|err| anyhow::anyhow!(err))
}

/// Converts floating-point frames into 16-bit PCM.
fn convert_samples(data: &[f32]) -> Vec<i16> {
    data.iter()
        .map(|&sample| (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect()
}

fn log_stream_error(error: StreamError) {
    warn!(%error, "audio stream error");
}
