//! Standard output of a kernel instance.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

/// Output sink shared by the kernel and its interpreter.
///
/// Writes go to the innermost active [`Capture`], or to the process stdout
/// when nothing is capturing.
#[derive(Clone, Default)]
pub struct Console {
    buffers: Rc<RefCell<Vec<String>>>,
}

impl Console {
    pub fn write(&self, text: &str) {
        if let Some(buffer) = self.buffers.borrow_mut().last_mut() {
            buffer.push_str(text);
            return;
        }
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }

    /// Redirects output into a fresh buffer until the guard is finished or
    /// dropped.
    pub fn capture(&self) -> Capture {
        let mut buffers = self.buffers.borrow_mut();
        buffers.push(String::new());
        Capture {
            console: self.clone(),
            depth: buffers.len(),
            released: false,
        }
    }

    fn release(&self, depth: usize) -> String {
        let mut buffers = self.buffers.borrow_mut();
        if buffers.len() < depth {
            return String::new();
        }
        buffers.truncate(depth);
        buffers.pop().unwrap_or_default()
    }
}

/// Scoped output redirection. Dropping the guard restores the previous
/// sink on every exit path, panics included.
pub struct Capture {
    console: Console,
    depth: usize,
    released: bool,
}

impl Capture {
    /// Ends the redirection and returns what was written.
    pub fn finish(mut self) -> String {
        self.released = true;
        self.console.release(self.depth)
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        if !self.released {
            self.console.release(self.depth);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_collects_writes() {
        let console = Console::default();
        let capture = console.capture();
        console.write("hello ");
        console.write("world\n");
        assert_eq!(capture.finish(), "hello world\n");
    }

    #[test]
    fn test_nested_captures() {
        let console = Console::default();
        let outer = console.capture();
        console.write("a");
        let inner = console.capture();
        console.write("b");
        assert_eq!(inner.finish(), "b");
        console.write("c");
        assert_eq!(outer.finish(), "ac");
    }

    #[test]
    fn test_drop_restores_previous_sink() {
        let console = Console::default();
        let outer = console.capture();
        {
            let _inner = console.capture();
            console.write("lost");
        }
        console.write("kept");
        assert_eq!(outer.finish(), "kept");
    }

    #[test]
    fn test_guard_released_on_panic() {
        let console = Console::default();
        let outer = console.capture();
        let inner_console = console.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _capture = inner_console.capture();
            inner_console.write("partial");
            panic!("boom");
        }));
        assert!(result.is_err());
        console.write("after");
        assert_eq!(outer.finish(), "after");
    }
}
