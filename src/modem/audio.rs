use std::path::Path;
use std::time::Duration;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use crate::modem::commands::{self, CONNECT, DEFAULT_COMMAND_TIMEOUT, OK};
use crate::modem::dle::{escape, DleDecoder, DleEvent};
use crate::modem::session::CallSession;
use crate::modem::transport::SerialPortIo;
use crate::modem::types::StopReason;

pub const SAMPLE_RATE: u32 = 8000;
pub const CHUNK_SIZE: usize = 1024;

/// Consecutive silent chunks that end a recording, roughly five seconds at 8 kHz.
pub const SILENT_CHUNK_LIMIT: usize = 40;

pub const DEFAULT_RECORD_DURATION: Duration = Duration::from_secs(120);

/// The only format the modem's voice codec is configured for.
pub fn voice_wav_spec() -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 8,
        sample_format: SampleFormat::Int
    }
}

/// Loads a WAV file as raw offset-binary 8-bit samples, the way the modem expects them.
pub fn read_voice_samples(path: &Path) -> Result<Vec<u8>, hound::Error> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    if spec.sample_rate != SAMPLE_RATE || spec.channels != 1 {
        warn!(
            "{} is {} Hz with {} channel(s), the modem plays 8000 Hz mono",
            path.display(), spec.sample_rate, spec.channels
        );
    }

    match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 8) => reader.samples::<i8>()
            .map(|sample| sample.map(|s| (s as i16 + 128) as u8))
            .collect(),
        (SampleFormat::Int, 16) => reader.samples::<i16>()
            .map(|sample| sample.map(|s| ((s >> 8) + 128) as u8))
            .collect(),
        (format, bits) => {
            error!("{} has unsupported sample format {:?}/{} bits", path.display(), format, bits);
            Err(hound::Error::Unsupported)
        }
    }
}

/// Writes raw offset-binary samples as an 8-bit mono 8 kHz WAV file.
pub fn write_voice_samples(path: &Path, samples: &[u8]) -> Result<(), hound::Error> {
    let mut writer = WavWriter::create(path, voice_wav_spec())?;
    for &sample in samples {
        writer.write_sample((sample as i16 - 128) as i8)?;
    }
    writer.finalize()
}

fn stop_reason(event: DleEvent, detect_silence: bool) -> Option<StopReason> {
    match event {
        DleEvent::EndOfData => Some(StopReason::EndOfData),
        DleEvent::LocalOffHook => Some(StopReason::LocalOffHook),
        DleEvent::BusyTone => Some(StopReason::BusyTone),
        DleEvent::DialTone => Some(StopReason::DialTone),
        DleEvent::Silence if detect_silence => Some(StopReason::Silence),
        _ => None
    }
}

impl<P: SerialPortIo> CallSession<P> {

    /// Streams a WAV file to the caller. Returns false if any setup step or
    /// write fails; nothing is retried.
    pub async fn play_audio(&mut self, path: &Path) -> bool {
        info!("Playing {}", path.display());
        let samples = match read_voice_samples(path) {
            Ok(samples) => samples,
            Err(e) => {
                error!("Failed to read {}: {}", path.display(), e);
                return false;
            }
        };

        let profile = self.profile;
        let steps = [
            (profile.enter_voice_mode, OK, "enter voice mode"),
            (profile.set_voice_compression, OK, "set voice compression"),
            (commands::TAD_OFF_HOOK, OK, "go off hook in answering device mode"),
            (commands::ENTER_VOICE_TRANSMIT_STATE, CONNECT, "enter the voice transmit state")
        ];
        for (command, expected, description) in steps {
            if !self.transport.send(command, Some(expected), DEFAULT_COMMAND_TIMEOUT).await.ok {
                error!("Failed to play audio, modem could not {}", description);
                return false;
            }
        }

        for chunk in samples.chunks(CHUNK_SIZE) {
            if let Err(e) = self.transport.write(&escape(chunk)).await {
                error!("Audio playback interrupted: {}", e);
                return false;
            }
            tokio::time::sleep(profile.tx_pacing).await;
        }

        // The modem answers OK once its transmit buffer has drained.
        if !self.transport.send(profile.end_voice_tx, Some(OK), DEFAULT_COMMAND_TIMEOUT).await.ok {
            error!("Failed to signal end of voice transmit data");
            return false;
        }

        debug!("Finished playing {} ({} samples)", path.display(), samples.len());
        true
    }

    /// Records the caller until a hangup signal, sustained silence or `max_duration`.
    ///
    /// Returns true only if a file with some non-silent content was written.
    pub async fn record_audio(&mut self, path: &Path, detect_silence: bool, max_duration: Duration) -> bool {
        info!("Recording {}", path.display());

        let profile = self.profile;
        let silence_detection = if detect_silence {
            profile.enable_silence_detection_5s
        } else {
            profile.disable_silence_detection
        };
        let steps = [
            (profile.enter_voice_mode, OK, "enter voice mode"),
            (profile.set_voice_compression, OK, "set voice compression"),
            (silence_detection, OK, "configure silence detection"),
            (commands::TAD_OFF_HOOK, OK, "go off hook in answering device mode"),
            (commands::SEND_BEEP, OK, "play the beep"),
            (commands::ENTER_VOICE_RECEIVE_STATE, CONNECT, "enter the voice receive state")
        ];
        for (command, expected, description) in steps {
            if !self.transport.send(command, Some(expected), DEFAULT_COMMAND_TIMEOUT).await.ok {
                error!("Failed to record audio, modem could not {}", description);
                return false;
            }
        }

        let started = Instant::now();
        let read_timeout = self.transport.read_timeout();
        let mut decoder = DleDecoder::new();
        let mut frames: Vec<Vec<u8>> = Vec::new();
        let mut silent_count = 0usize;

        let reason = loop {
            let remaining = max_duration.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break Some(StopReason::MaxDuration);
            }

            let chunk = match self.transport.read_chunk(CHUNK_SIZE, remaining.min(read_timeout)).await {
                Ok(chunk) if chunk.is_empty() => continue,
                Ok(chunk) => chunk,
                Err(e) => {
                    error!("Recording interrupted: {}", e);
                    break None;
                }
            };

            let mut decoded = decoder.decode(&chunk);
            let stop = decoded.events
                .iter()
                .find_map(|(offset, event)| stop_reason(*event, detect_silence).map(|reason| (*offset, reason)));
            if let Some((offset, reason)) = stop {
                decoded.samples.truncate(offset);
                if !decoded.samples.is_empty() {
                    frames.push(decoded.samples);
                }
                break Some(reason);
            }

            // `silent_count` only covers chunks that were kept.
            if detect_silence {
                if !profile.silence.is_silent(&decoded.samples) {
                    silent_count = 0;
                } else if silent_count == SILENT_CHUNK_LIMIT {
                    break Some(StopReason::Silence);
                } else {
                    silent_count += 1;
                }
            }

            frames.push(decoded.samples);
        };

        let saved = match reason {
            Some(reason) => {
                info!("Recording stopped after {:?}: {}", started.elapsed(), reason);
                save_recording(path, &frames, silent_count)
            },
            None => false
        };

        // Anything still buffered would be mistaken for the command response.
        if let Err(e) = self.transport.discard_buffers() {
            warn!("Failed to discard serial buffers after recording: {}", e);
        }
        if !self.transport.send(profile.end_voice_rx, Some(profile.end_voice_rx_response), DEFAULT_COMMAND_TIMEOUT).await.ok {
            error!("Failed to signal end of voice receive data");
        }

        saved
    }
}

/// Writes the captured frames unless they are nothing but trailing silence.
fn save_recording(path: &Path, frames: &[Vec<u8>], trailing_silent: usize) -> bool {
    if frames.len() <= trailing_silent {
        info!("Skipped saving silent recording");
        return false;
    }

    match write_voice_samples(path, &frames.concat()) {
        Ok(()) => {
            info!("Saved recording {}", path.display());
            true
        },
        Err(e) => {
            error!("Failed to save recording {}: {}", path.display(), e);
            false
        }
    }
}
