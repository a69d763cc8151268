//! Audio file playback.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;

/// Interval between busy-state polls while a file is playing.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Command-style audio output device.
pub trait AudioPlayer {
    /// Opens the output device.
    fn init(&mut self) -> Result<()>;
    /// Decodes `path` and queues it, paused.
    fn load(&mut self, path: &Path) -> Result<()>;
    fn play(&mut self);
    /// `true` while queued audio is still playing.
    fn is_busy(&self) -> bool;
    fn stop(&mut self);
    /// Releases the output device.
    fn release(&mut self);
}

/// Plays `path` to completion, blocking the calling thread.
///
/// # Details
/// The player is initialized here and always stopped and released before
/// returning, including when loading fails.
///
/// # Errors
/// Returns an error if the device cannot be opened or the file cannot be
/// decoded.
pub fn play_to_completion<P: AudioPlayer + ?Sized>(player: &mut P, path: &Path) -> Result<()> {
    player.init()?;
    let result = play_loaded(player, path);
    player.stop();
    player.release();
    result
}

fn play_loaded<P: AudioPlayer + ?Sized>(player: &mut P, path: &Path) -> Result<()> {
    player.load(path)?;
    player.play();
    while player.is_busy() {
        std::thread::sleep(POLL_INTERVAL);
    }
    debug!(path = %path.display(), "playback finished");
    Ok(())
}

/// [`AudioPlayer`] backed by the default Rodio output stream.
#[derive(Default)]
pub struct RodioPlayer {
    stream: Option<rodio::OutputStream>,
    sink: Option<rodio::Sink>,
}

impl AudioPlayer for RodioPlayer {
    fn init(&mut self) -> Result<()> {
        let mut stream = rodio::OutputStreamBuilder::open_default_stream()
            .map_err(|err| anyhow::anyhow!("Audio output initialization failed: {}", err))?;
        stream.log_on_drop(false);
        self.stream = Some(stream);
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Audio output not initialized"))?;
        let file = File::open(path)
            .with_context(|| format!("Failed to open audio file {}", path.display()))?;
        let source = rodio::Decoder::new(BufReader::new(file))
            .with_context(|| format!("Failed to decode {}", path.display()))?;
        let sink = rodio::Sink::connect_new(stream.mixer());
        sink.pause();
        sink.append(source);
        self.sink = Some(sink);
        Ok(())
    }

    fn play(&mut self) {
        if let Some(sink) = &self.sink {
            sink.play();
        }
    }

    fn is_busy(&self) -> bool {
        self.sink.as_ref().is_some_and(|sink| !sink.empty())
    }

    fn stop(&mut self) {
        if let Some(sink) = &self.sink {
            sink.stop();
        }
    }

    fn release(&mut self) {
        self.sink = None;
        self.stream = None;
    }
}
