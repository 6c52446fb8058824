use std::backtrace::Backtrace;
use std::sync::atomic::{AtomicBool, Ordering};

/// When set, captured stacks keep only test-harness frames instead of
/// dropping internal ones. Process-wide.
static TEST_FRAME_CAPTURE: AtomicBool = AtomicBool::new(false);

/// Frames belonging to this crate's own implementation or to runtime
/// plumbing, dropped from captured stacks.
const INTERNAL_FRAME_MARKERS: &[&str] = &[
    "optrace::",
    "std::",
    "core::",
    "alloc::",
    "tokio::",
    "backtrace::",
    "__rust",
    "__libc",
    "_start",
];

/// Switches captured stacks into test mode: keep only frames that mention
/// the test harness rather than filtering out internal frames.
pub fn set_test_frame_capture(enabled: bool) {
    TEST_FRAME_CAPTURE.store(enabled, Ordering::SeqCst);
}

/// Captures the calling thread's current frame list as display strings.
///
/// Never fails; a stripped binary yielding no resolvable frames produces an
/// empty list.
pub(crate) fn capture_stack() -> Vec<String> {
    let backtrace = Backtrace::force_capture();
    let frames = parse_frames(&backtrace.to_string());
    filter_frames(frames, TEST_FRAME_CAPTURE.load(Ordering::SeqCst))
}

// Rendered backtraces interleave "N: symbol" frame lines with
// "at path:line:col" location lines; only the former carry symbol names.
fn parse_frames(rendered: &str) -> Vec<String> {
    let mut frames = Vec::new();
    for line in rendered.lines() {
        let Some((index, symbol)) = line.trim_start().split_once(": ") else {
            continue;
        };
        if index.trim().parse::<usize>().is_err() {
            continue;
        }
        frames.push(symbol.trim().to_string());
    }
    frames
}

fn filter_frames(frames: Vec<String>, test_mode: bool) -> Vec<String> {
    if test_mode {
        return frames
            .into_iter()
            .filter(|frame| frame.contains("test"))
            .collect();
    }
    frames
        .into_iter()
        .filter(|frame| {
            !INTERNAL_FRAME_MARKERS
                .iter()
                .any(|marker| frame.contains(marker))
        })
        .collect()
}
