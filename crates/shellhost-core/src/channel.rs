//! Byte-stream reading and line assembly.
//!
//! Each output stream gets one reader thread. Reads block for a bounded
//! wait; a quiet timeout flushes any carried fragment as a provisional
//! line so prompt text that arrives without a terminator still surfaces.

use crate::classify::LineClassifier;
use crate::config::SessionConfig;
use crate::error::{Result, ShellHostError};
use encoding_rs::{Encoding, UTF_8};
use shellhost_types::StreamRole;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Reassembles decoded lines from arbitrary byte fragments.
///
/// Terminators are `\n`, `\r\n` and lone `\r`. Bytes after the last
/// terminator are carried into the next push; a trailing `\r` is held
/// back in case the matching `\n` arrives in the next fragment.
pub struct LineAssembler {
    carry: Vec<u8>,
    max_line: usize,
    carry_limit: usize,
    candidates: Vec<&'static Encoding>,
}

impl LineAssembler {
    pub fn new(config: &SessionConfig) -> Result<Self> {
        Ok(Self {
            carry: Vec::new(),
            max_line: config.max_line_length,
            carry_limit: config.carry_limit,
            candidates: encoding_candidates(config)?,
        })
    }

    /// Feed a fragment; returns every line completed by it.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(bytes);
        let mut out = Vec::new();

        loop {
            let Some(i) = self
                .carry
                .iter()
                .position(|&b| b == b'\n' || b == b'\r')
            else {
                break;
            };
            if self.carry[i] == b'\r' {
                if i + 1 == self.carry.len() {
                    // Terminator may still be half of a \r\n pair.
                    break;
                }
                let skip = if self.carry[i + 1] == b'\n' { 2 } else { 1 };
                let line = self.decode(&self.carry[..i]);
                self.emit(&line, &mut out);
                self.carry.drain(..i + skip);
            } else {
                let line = self.decode(&self.carry[..i]);
                self.emit(&line, &mut out);
                self.carry.drain(..i + 1);
            }
        }

        // Runaway unterminated output is flushed rather than buffered
        // without bound.
        if self.carry.len() >= self.carry_limit {
            out.extend(self.flush());
        }
        out
    }

    /// Decode whatever is carried as a final (or provisional) line.
    pub fn flush(&mut self) -> Vec<String> {
        if self.carry.is_empty() {
            return Vec::new();
        }
        let carried = std::mem::take(&mut self.carry);
        let line = self.decode(&carried);
        let mut out = Vec::new();
        self.emit(&line, &mut out);
        out
    }

    pub fn has_carry(&self) -> bool {
        !self.carry.is_empty()
    }

    /// Strict decode against each candidate in order; bytes no
    /// candidate accepts fall through to lossy UTF-8.
    fn decode(&self, bytes: &[u8]) -> String {
        for enc in &self.candidates {
            if let Some(text) = enc.decode_without_bom_handling_and_without_replacement(bytes) {
                return text.into_owned();
            }
        }
        String::from_utf8_lossy(bytes).into_owned()
    }

    fn emit(&self, line: &str, out: &mut Vec<String>) {
        if line.chars().count() <= self.max_line {
            out.push(line.to_string());
            return;
        }
        let mut chunk = String::new();
        let mut len = 0;
        for c in line.chars() {
            chunk.push(c);
            len += 1;
            if len == self.max_line {
                out.push(std::mem::take(&mut chunk));
                len = 0;
            }
        }
        if !chunk.is_empty() {
            out.push(chunk);
        }
    }
}

/// Decode candidates for subprocess output: the configured override
/// first, then UTF-8.
pub fn encoding_candidates(config: &SessionConfig) -> Result<Vec<&'static Encoding>> {
    let mut candidates = Vec::new();
    if let Some(label) = &config.stdin_encoding {
        let enc = Encoding::for_label(label.as_bytes())
            .ok_or_else(|| ShellHostError::UnsupportedEncoding(label.clone()))?;
        candidates.push(enc);
    }
    if !candidates.contains(&UTF_8) {
        candidates.push(UTF_8);
    }
    Ok(candidates)
}

enum WaitOutcome {
    Ready,
    Timeout,
}

#[cfg(unix)]
fn wait_readable(fd: i32, wait_ms: u64) -> WaitOutcome {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let rc = unsafe { libc::poll(&mut pfd, 1, wait_ms as libc::c_int) };
    if rc == 0 {
        WaitOutcome::Timeout
    } else {
        // Errors surface through the read that follows.
        WaitOutcome::Ready
    }
}

#[cfg(not(unix))]
fn wait_readable(_fd: i32, _wait_ms: u64) -> WaitOutcome {
    WaitOutcome::Ready
}

/// One reader thread draining a subprocess output stream into the
/// classifier.
pub struct OutputChannel {
    finished: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl OutputChannel {
    #[cfg(unix)]
    pub fn spawn<R>(
        reader: R,
        role: StreamRole,
        classifier: Arc<LineClassifier>,
        config: &SessionConfig,
    ) -> Result<Self>
    where
        R: Read + std::os::unix::io::AsRawFd + Send + 'static,
    {
        let fd = reader.as_raw_fd();
        Self::spawn_inner(reader, fd, role, classifier, config)
    }

    #[cfg(not(unix))]
    pub fn spawn<R>(
        reader: R,
        role: StreamRole,
        classifier: Arc<LineClassifier>,
        config: &SessionConfig,
    ) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        Self::spawn_inner(reader, -1, role, classifier, config)
    }

    fn spawn_inner<R>(
        mut reader: R,
        fd: i32,
        role: StreamRole,
        classifier: Arc<LineClassifier>,
        config: &SessionConfig,
    ) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        let mut assembler = LineAssembler::new(config)?;
        let wait_ms = config.read_wait_ms;
        let finished = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));
        let thread_finished = finished.clone();
        let thread_stop = stop.clone();

        let handle = std::thread::Builder::new()
            .name(format!("shellhost-{role:?}").to_lowercase())
            .spawn(move || {
                let mut buf = [0u8; 4096];
                loop {
                    if thread_stop.load(Ordering::SeqCst) {
                        break;
                    }
                    match wait_readable(fd, wait_ms) {
                        WaitOutcome::Timeout => {
                            // Quiet stream; surface any carried fragment.
                            for line in assembler.flush() {
                                classifier.interpret(&line, role);
                            }
                        }
                        WaitOutcome::Ready => match reader.read(&mut buf) {
                            Ok(0) => {
                                for line in assembler.flush() {
                                    classifier.interpret(&line, role);
                                }
                                break;
                            }
                            Ok(n) => {
                                for line in assembler.push(&buf[..n]) {
                                    classifier.interpret(&line, role);
                                }
                            }
                            Err(e) => {
                                tracing::warn!(
                                    target: "shellhost::channel",
                                    "Read failed on {role:?}: {e}"
                                );
                                // A fragment read just before the
                                // failure still surfaces.
                                for line in assembler.flush() {
                                    classifier.interpret(&line, role);
                                }
                                break;
                            }
                        },
                    }
                }
                thread_finished.store(true, Ordering::SeqCst);
                tracing::debug!(target: "shellhost::channel", "Reader for {role:?} finished");
            })
            .map_err(ShellHostError::Io)?;

        Ok(Self {
            finished,
            stop,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Ask the reader to stop after its current wait.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Stop and join the reader thread.
    pub fn join(&self) {
        self.request_stop();
        if let Ok(mut guard) = self.handle.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
    }
}
