//! Console speech adapters
//!
//! Typed lines stand in for recognised speech and prompts are printed. Used
//! by the `coolsafe` binary to drive the voice workflow from a terminal.

use parking_lot::Mutex;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use super::{
    CaptureError, CaptureEvent, CaptureSessionId, SpeechCapture, SpeechSink, SpeechSynthesizer,
    SynthesisError, UtteranceId,
};

/// Reads stdin lines as final transcripts for the active capture session
pub struct ConsoleCapture {
    active: Arc<Mutex<Option<CaptureSessionId>>>,
    sink: SpeechSink,
}

impl ConsoleCapture {
    /// Starts the stdin reader thread
    pub fn spawn(sink: SpeechSink) -> Self {
        let active: Arc<Mutex<Option<CaptureSessionId>>> = Arc::new(Mutex::new(None));

        let reader_active = active.clone();
        let reader_sink = sink.clone();
        std::thread::spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::error!("Failed to read stdin: {}", e);
                        break;
                    }
                };
                let text = line.trim();
                if text.is_empty() {
                    continue;
                }

                let session = *reader_active.lock();
                match session {
                    Some(id) => {
                        reader_sink.capture(id, CaptureEvent::Interim(text.to_string()));
                        reader_sink.capture(id, CaptureEvent::Final(text.to_string()));
                    }
                    None => tracing::debug!("Not listening; ignored input {:?}", text),
                }
            }
            tracing::info!("Console input closed");
        });

        Self { active, sink }
    }

    fn end_session(&mut self) {
        if let Some(id) = self.active.lock().take() {
            self.sink.capture(id, CaptureEvent::Stopped);
        }
    }
}

impl SpeechCapture for ConsoleCapture {
    fn start(&mut self, session: CaptureSessionId) -> Result<(), CaptureError> {
        *self.active.lock() = Some(session);
        Ok(())
    }

    fn stop(&mut self) {
        self.end_session();
    }

    fn cancel(&mut self) {
        self.end_session();
    }
}

/// Prints utterances to stdout and reports them finished immediately
pub struct ConsoleSynthesizer {
    sink: SpeechSink,
}

impl ConsoleSynthesizer {
    pub fn new(sink: SpeechSink) -> Self {
        Self { sink }
    }
}

impl SpeechSynthesizer for ConsoleSynthesizer {
    fn speak(&mut self, utterance: UtteranceId, text: &str) -> Result<(), SynthesisError> {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "[coolsafe] {}", text).map_err(|e| SynthesisError(e.to_string()))?;
        stdout.flush().map_err(|e| SynthesisError(e.to_string()))?;
        self.sink.speech_finished(utterance);
        Ok(())
    }

    fn cancel(&mut self) {}
}
