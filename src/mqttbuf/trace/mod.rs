//! Per-thread call-stack trace, the diagnostic substrate the buffering core
//! logs and panics through.
//!
//! Every public operation on [`CallStackTrace`] takes its own lock: unlike
//! [`crate::mqttbuf::inbound::InboundBuffer`] and
//! [`crate::mqttbuf::outbound::OutboundBuffer`], which rely on the caller
//! already holding the transport's socket-table mutex, entry/exit can be
//! invoked from any thread at any time, so this type is self-synchronizing.
//!
//! Wrapping every function body in matching entry/exit calls by hand makes
//! it trivially easy to return early and forget the matching exit call. The
//! idiomatic fix is a guard: constructing one records entry, and its `Drop`
//! impl records exit unconditionally, so a `?` or early `return` can't
//! desynchronize the stack.

use std::fmt::Write as _;
use std::io;
use std::sync::Mutex;
use std::thread::ThreadId;

use tracing::Level;

use crate::mqttbuf::common::{Error, Result};

pub const MAX_STACK_DEPTH: usize = 50;
pub const MAX_FUNCTION_NAME_LENGTH: usize = 30;
pub const MAX_THREADS: usize = 255;
/// Minimum buffer size accepted by [`CallStackTrace::get`].
pub const MIN_TRACE_BUFFER_SIZE: usize = 100;

#[derive(Clone)]
struct StackEntry {
    name: String,
    line: u32,
}

struct ThreadStack {
    thread_id: ThreadId,
    current_depth: usize,
    max_depth: usize,
    entries: Vec<StackEntry>,
}

impl ThreadStack {
    fn new(thread_id: ThreadId) -> Self {
        ThreadStack {
            thread_id,
            current_depth: 0,
            max_depth: 0,
            entries: Vec::with_capacity(MAX_STACK_DEPTH),
        }
    }
}

/// Bounded per-thread stack of `(function_name, line)` entries with
/// entry/exit hooks and a dump-on-demand mechanism for post-mortem
/// diagnostics. Thread slots are allocated lazily on first use and never
/// recycled, up to [`MAX_THREADS`].
pub struct CallStackTrace {
    threads: Mutex<Vec<ThreadStack>>,
}

impl CallStackTrace {
    pub const fn new() -> Self {
        CallStackTrace { threads: Mutex::new(Vec::new()) }
    }

    /// Records entry into `name` at `line` for the current thread. If
    /// `trace_level` is set, also emits a real-time tracing event at that
    /// level. Fatal-logs (and panics) if this thread's stack is already at
    /// [`MAX_STACK_DEPTH`].
    ///
    /// Silently does nothing if this is a new thread and [`MAX_THREADS`]
    /// thread slots are already in use -- thread slots are a soft cap on
    /// tracing coverage, not a hard resource limit on the caller.
    pub fn entry(&self, name: &str, line: u32, trace_level: Option<Level>) {
        let thread_id = std::thread::current().id();
        let mut threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());

        let stack = match find_or_create(&mut threads, thread_id) {
            Some(stack) => stack,
            None => return,
        };

        if let Some(level) = trace_level {
            log_at_level(level, format_args!("--> {} ({}) depth={}", name, line, stack.current_depth));
        }

        stack.entries.push(StackEntry { name: truncate_name(name).to_string(), line });
        stack.current_depth += 1;
        if stack.current_depth > stack.max_depth {
            stack.max_depth = stack.current_depth;
        }
        if stack.current_depth >= MAX_STACK_DEPTH {
            tracing::error!(name, line, "max stack depth exceeded");
            panic!("max stack depth exceeded in {} ({})", name, line);
        }
    }

    /// Records exit from `name` at `line` for the current thread.
    /// Fatal-logs (and panics) on stack underflow or an entry/exit name
    /// mismatch: both indicate control-flow corruption upstream.
    pub fn exit(&self, name: &str, line: u32, trace_level: Option<Level>) {
        let thread_id = std::thread::current().id();
        let mut threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());

        let stack = match threads.iter_mut().find(|t| t.thread_id == thread_id) {
            Some(stack) => stack,
            None => return,
        };

        let new_depth = match stack.current_depth.checked_sub(1) {
            Some(d) => d,
            None => {
                tracing::error!(name, line, "minimum stack depth exceeded for thread {:?}", thread_id);
                panic!("stack underflow exiting {} ({})", name, line);
            }
        };
        stack.current_depth = new_depth;

        let entered_name = stack.entries.pop().map(|e| e.name);
        if entered_name.as_deref() != Some(truncate_name(name)) {
            tracing::error!(
                expected = entered_name.as_deref().unwrap_or("<empty>"),
                actual = name,
                "stack mismatch on exit"
            );
            panic!("stack mismatch: entry {:?} exit {}", entered_name, name);
        }

        if let Some(level) = trace_level {
            log_at_level(level, format_args!("<-- {} ({}) depth={}", name, line, new_depth));
        }
    }

    /// Constructs a [`TraceGuard`] that records entry now and records exit
    /// when dropped, regardless of how the enclosing scope is left.
    pub fn enter(&self, name: &'static str, line: u32, trace_level: Option<Level>) -> TraceGuard<'_> {
        self.entry(name, line, trace_level);
        TraceGuard { trace: self, name, line, trace_level }
    }

    /// Dumps every thread's live stack to `dest`, most-recent frame first.
    pub fn print_stack(&self, dest: &mut dyn io::Write) -> io::Result<()> {
        let threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
        for stack in threads.iter() {
            writeln!(dest, "=========== Start of stack trace for thread {:?} ==========", stack.thread_id)?;
            let mut i = stack.current_depth;
            let mut first = true;
            while i > 0 {
                i -= 1;
                let entry = &stack.entries[i];
                if first {
                    writeln!(dest, "{} ({})", entry.name, entry.line)?;
                    first = false;
                } else {
                    writeln!(dest, "   at {} ({})", entry.name, entry.line)?;
                }
            }
            writeln!(dest, "=========== End of stack trace for thread {:?} ==========\n", stack.thread_id)?;
        }
        Ok(())
    }

    /// Formats a single thread's stack into `buf`, most-recent frame first.
    /// `buf` must be at least [`MIN_TRACE_BUFFER_SIZE`] bytes; the output is
    /// truncated (at a UTF-8 char boundary) if it would overflow `buf`.
    pub fn get<'a>(&self, thread_id: ThreadId, buf: &'a mut [u8]) -> Result<&'a str> {
        if buf.len() < MIN_TRACE_BUFFER_SIZE {
            return Err(Error::new(format!(
                "trace buffer must be at least {} bytes", MIN_TRACE_BUFFER_SIZE
            )));
        }
        let threads = self.threads.lock()?;
        let mut writer = SliceWriter::new(buf);
        if let Some(stack) = threads.iter().find(|t| t.thread_id == thread_id) {
            let mut i = stack.current_depth;
            let mut first = true;
            while i > 0 {
                i -= 1;
                let entry = &stack.entries[i];
                if first {
                    let _ = write!(writer, "{} ({})", entry.name, entry.line);
                    first = false;
                } else {
                    let _ = write!(writer, "\n   at {} ({})", entry.name, entry.line);
                }
            }
        }
        Ok(writer.into_str())
    }
}

impl Default for CallStackTrace {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate_name(name: &str) -> &str {
    let end = name.char_indices().nth(MAX_FUNCTION_NAME_LENGTH).map(|(i, _)| i).unwrap_or(name.len());
    &name[..end]
}

fn find_or_create(threads: &mut Vec<ThreadStack>, thread_id: ThreadId) -> Option<&mut ThreadStack> {
    if let Some(idx) = threads.iter().position(|t| t.thread_id == thread_id) {
        return threads.get_mut(idx);
    }
    if threads.len() >= MAX_THREADS {
        return None;
    }
    threads.push(ThreadStack::new(thread_id));
    threads.last_mut()
}

fn log_at_level(level: Level, args: std::fmt::Arguments) {
    match level {
        Level::ERROR => tracing::error!("{}", args),
        Level::WARN => tracing::warn!("{}", args),
        Level::INFO => tracing::info!("{}", args),
        Level::DEBUG => tracing::debug!("{}", args),
        Level::TRACE => tracing::trace!("{}", args),
    }
}

/// A guard returned by [`CallStackTrace::enter`]. Records exit from the
/// traced function when dropped.
pub struct TraceGuard<'a> {
    trace: &'a CallStackTrace,
    name: &'static str,
    line: u32,
    trace_level: Option<Level>,
}

impl Drop for TraceGuard<'_> {
    fn drop(&mut self) {
        self.trace.exit(self.name, self.line, self.trace_level);
    }
}

/// Writes UTF-8 text into a fixed-size byte slice, silently truncating
/// (at a char boundary) instead of erroring once the slice fills up --
/// the Rust analogue of `snprintf` writing into a caller-provided buffer.
struct SliceWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> SliceWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        SliceWriter { buf, pos: 0 }
    }

    fn into_str(self) -> &'a str {
        // Safety: every write only ever appends valid UTF-8 (str::as_bytes of
        // the fmt::Write input), and truncation stops at a char boundary.
        std::str::from_utf8(&self.buf[..self.pos]).unwrap_or("")
    }
}

impl std::fmt::Write for SliceWriter<'_> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        let remaining = self.buf.len() - self.pos;
        let mut to_write = s.len().min(remaining);
        while to_write > 0 && !s.is_char_boundary(to_write) {
            to_write -= 1;
        }
        self.buf[self.pos..self.pos + to_write].copy_from_slice(&s.as_bytes()[..to_write]);
        self.pos += to_write;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_env_log::test;

    #[test]
    fn test_balanced_entry_exit_returns_depth_to_zero() {
        let trace = CallStackTrace::new();
        trace.entry("outer", 1, None);
        trace.entry("inner", 2, None);
        trace.exit("inner", 2, None);
        trace.exit("outer", 1, None);

        let thread_id = std::thread::current().id();
        let mut buf = [0u8; 128];
        let s = trace.get(thread_id, &mut buf).unwrap();
        assert_eq!(s, "");
    }

    #[test]
    fn test_guard_records_exit_on_early_return() {
        let trace = CallStackTrace::new();

        fn traced(trace: &CallStackTrace, fail: bool) -> Result<()> {
            let _guard = trace.enter("traced", 10, None);
            if fail {
                return Err(Error::new("boom"));
            }
            Ok(())
        }

        assert!(traced(&trace, true).is_err());

        let thread_id = std::thread::current().id();
        let mut buf = [0u8; 128];
        let s = trace.get(thread_id, &mut buf).unwrap();
        assert_eq!(s, "");
    }

    #[test]
    fn test_long_multibyte_name_truncates_consistently_between_entry_and_exit() {
        // Each 'e' is 2 bytes, so a byte-indexed truncation at
        // MAX_FUNCTION_NAME_LENGTH would land mid-char and disagree with a
        // char-indexed one. entry/exit must use the same truncation.
        let name: String = std::iter::repeat('\u{e9}').take(40).collect();
        let trace = CallStackTrace::new();
        trace.entry(&name, 1, None);
        trace.exit(&name, 1, None);
    }

    #[test]
    #[should_panic(expected = "stack mismatch")]
    fn test_mismatched_exit_panics() {
        let trace = CallStackTrace::new();
        trace.entry("f", 1, None);
        trace.exit("g", 2, None);
    }

    #[test]
    #[should_panic(expected = "stack underflow")]
    fn test_exit_without_entry_panics() {
        let trace = CallStackTrace::new();
        trace.entry("f", 1, None);
        trace.exit("f", 1, None);
        trace.exit("f", 1, None);
    }

    #[test]
    fn test_get_formats_top_of_stack_first() {
        let trace = CallStackTrace::new();
        trace.entry("f", 10, None);
        trace.entry("g", 20, None);

        let thread_id = std::thread::current().id();
        let mut buf = [0u8; 128];
        let s = trace.get(thread_id, &mut buf).unwrap();
        assert_eq!(s, "g (20)\n   at f (10)");
    }

    #[test]
    fn test_get_rejects_undersized_buffer() {
        let trace = CallStackTrace::new();
        let thread_id = std::thread::current().id();
        let mut buf = [0u8; 10];
        assert!(trace.get(thread_id, &mut buf).is_err());
    }

    #[test]
    fn test_print_stack_emits_one_block_per_thread() {
        let trace = CallStackTrace::new();
        trace.entry("f", 10, None);
        trace.entry("g", 20, None);

        let mut out = Vec::new();
        trace.print_stack(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches("Start of stack trace").count(), 1);
        assert!(text.contains("g (20)"));
        assert!(text.contains("at f (10)"));
    }
}
