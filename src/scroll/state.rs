//! Per-session record of what scrolling has done to the page.

use crate::platform::PageHost;

use super::css::Stylesheet;

/// One side effect to undo.
#[derive(Debug, Clone, PartialEq)]
pub enum Undo {
    RemoveCss(Stylesheet),
    ScrollTo { x: f64, y: f64 },
}

#[derive(Debug, Default)]
pub struct ScrollState {
    positioned: bool,
    reset: bool,
    undo: Vec<Undo>,
}

impl ScrollState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True exactly once: on the first tile positioned this session.
    pub fn take_first(&mut self) -> bool {
        !std::mem::replace(&mut self.positioned, true)
    }

    pub fn is_reset(&self) -> bool {
        self.reset
    }

    pub fn mark_reset(&mut self) {
        self.reset = true;
    }

    pub fn push(&mut self, undo: Undo) {
        self.undo.push(undo);
    }

    pub fn pending(&self) -> &[Undo] {
        &self.undo
    }

    /// Undo everything, newest first. Failures are logged and skipped so one
    /// stuck stylesheet does not keep the page scrolled away. Calling it
    /// again is a no-op.
    pub async fn restore<H: PageHost + ?Sized>(&mut self, host: &H) {
        if self.undo.is_empty() {
            return;
        }
        log::debug!("[SCROLL] Restoring {} page change(s)", self.undo.len());
        while let Some(undo) = self.undo.pop() {
            let result = match &undo {
                Undo::RemoveCss(sheet) => host.remove_css(sheet).await,
                Undo::ScrollTo { x, y } => host.scroll_to(*x, *y).await,
            };
            if let Err(e) = result {
                log::warn!("[SCROLL] Restore step {:?} failed: {:#}", undo, e);
            }
        }
        self.reset = false;
    }
}
