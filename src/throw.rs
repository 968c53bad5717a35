//! The catch-frame stack and the throw engine.
//!
//! Every protected region pushes a [`CatchFrame`] holding the context to
//! come back to. A throw records the exception, pops the innermost frame
//! and jumps to it; the landing site then checks the type and either claims
//! the payload or rethrows to the next frame out. Nothing between the throw
//! and the landing site runs any cleanup, generated code arranges its own
//! cleanup through nested frames.
//!
//! ```text
//! ENTERED ──pop──────────────► NORMAL_EXIT
//!    │
//!    └─throw─► EXCEPTION_RESUMED ──type matches──► HANDLED
//!                     │
//!                     └──────────rethrow─────────► FORWARDED
//! ```


use std::io;

use crate::context::{Capture, SavedContext};
use crate::exception::{ExceptionState, Payload, SourceLocation};
use crate::stdext;
use crate::types::TypeDescriptor;

/// Writes the runtime-specific text appended to an unhandled-exception report.
pub type ReportExtension = fn(&mut dyn io::Write) -> io::Result<()>;

/// One registered resumption point.
#[derive(Debug)]
pub struct CatchFrame<C> {
    sequence_number: u64,
    context: C,
    previous: Option<Box<CatchFrame<C>>>,
}

impl<C> CatchFrame<C> {
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }
}

/// The catch-frame stack, the in-flight exception and the frame counter.
///
/// Not synchronized in any way. One runtime serves one thread of control.
#[derive(Debug)]
pub struct Runtime<C, T> {
    top: Option<Box<CatchFrame<C>>>,
    depth: usize,
    tries: u64,
    exception: Option<ExceptionState<T>>,
    report_extension: Option<ReportExtension>,
}

impl<C, T> Default for Runtime<C, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C, T> Runtime<C, T> {
    pub const fn new() -> Self {
        Runtime {
            top: None,
            depth: 0,
            tries: 0,
            exception: None,
            report_extension: None,
        }
    }

    /// Registers a catch frame.
    ///
    /// Returns `true` when the context was freshly captured and the
    /// protected body should run, `false` when control came back here
    /// through a throw and the handler should run instead. A resumed
    /// capture pushes nothing: its frame was already consumed by the throw.
    pub fn push_frame(&mut self, capture: Capture<C>) -> bool {
        let Capture::Fresh(context) = capture else {
            trace!(depth = self.depth, "resumed via throw");
            return false;
        };

        self.tries += 1;
        self.top = Some(Box::new(CatchFrame {
            sequence_number: self.tries,
            context,
            previous: self.top.take(),
        }));
        self.depth += 1;
        trace!(seq = self.tries, depth = self.depth, "pushed catch frame");

        true
    }

    /// Removes the innermost frame without jumping anywhere, if there is one.
    pub fn try_pop_frame(&mut self) -> Option<C> {
        let frame = self.top.take()?;
        let CatchFrame {
            sequence_number,
            context,
            previous,
        } = *frame;
        self.top = previous;
        self.depth -= 1;
        trace!(seq = sequence_number, depth = self.depth, "popped catch frame");

        Some(context)
    }

    /// The live frames, innermost first.
    pub fn frames(&self) -> impl Iterator<Item = &CatchFrame<C>> {
        core::iter::successors(self.top.as_deref(), |frame| frame.previous.as_deref())
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn exception(&self) -> Option<&ExceptionState<T>> {
        self.exception.as_ref()
    }

    pub fn set_report_extension(&mut self, extension: Option<ReportExtension>) {
        self.report_extension = extension;
    }

    /// Records type and payload without touching the throw site.
    pub fn store(&mut self, type_descriptor: T, payload: Payload) {
        let location = self.exception.take().and_then(|state| state.location);
        self.exception = Some(ExceptionState {
            location,
            type_descriptor,
            payload,
        });
    }
}

impl<C: SavedContext, T: TypeDescriptor> Runtime<C, T> {
    /// Normal exit from a protected region. An empty stack means pushes and
    /// pops went out of step, which is reported like an unhandled exception.
    pub fn pop_frame(&mut self) -> C {
        match self.try_pop_frame() {
            Some(context) => context,
            None => {
                warn!("catch frame stack underflow");
                self.unhandled()
            }
        }
    }

    /// Records the exception and transfers control to the innermost catch
    /// frame, which is consumed by the transfer.
    pub fn throw(
        &mut self,
        location: SourceLocation,
        type_descriptor: T,
        payload: Payload,
    ) -> ! {
        trace!(
            file = ?location.file,
            line = location.line,
            ty = %type_descriptor,
            "throw"
        );
        self.exception = Some(ExceptionState {
            location: Some(location),
            type_descriptor,
            payload,
        });
        self.unwind_to_handler()
    }

    /// Forwards the in-flight exception, unchanged, to the next frame out.
    pub fn rethrow(&mut self) -> ! {
        trace!(depth = self.depth, "rethrow");
        self.unwind_to_handler()
    }

    fn unwind_to_handler(&mut self) -> ! {
        match self.try_pop_frame() {
            Some(context) => context.resume(),
            None => self.unhandled(),
        }
    }

    /// Claims the in-flight exception's payload if its type is `candidate`.
    pub fn check_type(&self, candidate: &T) -> Option<Payload> {
        let state = self.exception.as_ref()?;
        let matched = state.type_descriptor.equals(candidate);
        trace!(thrown = %state.type_descriptor, %candidate, matched, "check exception type");

        matched.then_some(state.payload)
    }

    /// Writes the in-flight exception's report line, extension included, or
    /// a note that nothing is in flight.
    pub fn write_exception_report(&self, w: &mut dyn io::Write) -> io::Result<()> {
        match &self.exception {
            Some(state) => {
                write!(w, "{state}")?;
                if let Some(extension) = self.report_extension {
                    write!(w, " Exception ")?;
                    extension(w)?;
                }
                writeln!(w)
            }
            None => writeln!(w, "No exception in flight, catch frame stack is empty."),
        }
    }

    /// Writes the report printed when an exception reaches the bottom of
    /// the stack.
    pub fn write_unhandled_report(&self, w: &mut dyn io::Write) -> io::Result<()> {
        writeln!(w, "Unhandled exception")?;
        self.write_exception_report(w)
    }

    fn unhandled(&self) -> ! {
        let mut stderr = stdext::STDERR;
        // Nothing left to report a failed report to.
        let _ = self.write_unhandled_report(&mut stderr);
        stdext::raise_abort()
    }
}

impl<C, T> Drop for Runtime<C, T> {
    fn drop(&mut self) {
        let mut next = self.top.take();
        while let Some(mut frame) = next {
            next = frame.previous.take();
        }
    }
}
