//! Graph transport state machine
//!
//! Tracks what the mixer graph is doing and guards the offline render. While
//! a render is in progress the graph is owned by the render and every other
//! mutation is rejected.
//!
//! ```text
//! Idle --load(n>0)--> Loaded --play--> Previewing
//!   ^                   |  ^              |
//!   +----load(0)--------+  +----stop------+
//! Loaded|Previewing --begin_render--> Rendering --end_render--> Loaded
//! ```

use std::fmt;

use log::{debug, warn};

use crate::error::{MixError, Result};

/// Graph states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GraphState {
    /// No units allocated
    #[default]
    Idle,
    /// Units allocated, nothing scheduled
    Loaded,
    /// Units scheduled on the live output
    Previewing,
    /// Offline render in progress
    Rendering,
}

impl fmt::Display for GraphState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphState::Idle => write!(f, "Idle"),
            GraphState::Loaded => write!(f, "Loaded"),
            GraphState::Previewing => write!(f, "Previewing"),
            GraphState::Rendering => write!(f, "Rendering"),
        }
    }
}

/// Transport for the mixer graph
#[derive(Debug, Clone, Default)]
pub struct GraphTransport {
    state: GraphState,
    /// Whether the live output was running when the render began
    output_was_running: bool,
    /// State before the render, for logging
    state_before_render: Option<GraphState>,
}

impl GraphTransport {
    /// Create a transport in the `Idle` state
    ///
    /// # Example
    /// ```
    /// use mixdown::engine::{GraphState, GraphTransport};
    /// let transport = GraphTransport::new();
    /// assert_eq!(transport.state(), GraphState::Idle);
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> GraphState {
        self.state
    }

    pub fn is_rendering(&self) -> bool {
        self.state == GraphState::Rendering
    }

    pub fn is_previewing(&self) -> bool {
        self.state == GraphState::Previewing
    }

    fn busy(&self) -> Result<()> {
        if self.is_rendering() {
            warn!("[TRANSPORT] Rejected while rendering");
            return Err(MixError::GraphBusy { state: self.state });
        }
        Ok(())
    }

    /// Units were rebuilt
    pub fn on_load(&mut self, unit_count: usize) -> Result<()> {
        self.busy()?;
        let previous = self.state;
        self.state = if unit_count > 0 {
            GraphState::Loaded
        } else {
            GraphState::Idle
        };
        debug!(
            "[TRANSPORT] Load {} units: {} -> {}",
            unit_count, previous, self.state
        );
        Ok(())
    }

    /// Check that a preview may start
    pub fn check_preview(&self) -> Result<()> {
        self.busy()
    }

    /// Units were scheduled on the live output
    ///
    /// With no units loaded the graph stays `Idle`.
    pub fn on_preview_start(&mut self) -> Result<()> {
        self.busy()?;
        if self.state != GraphState::Idle {
            debug!("[TRANSPORT] Preview: {} -> Previewing", self.state);
            self.state = GraphState::Previewing;
        }
        Ok(())
    }

    /// Preview stopped; a no-op unless previewing
    pub fn on_preview_stop(&mut self) {
        if self.state == GraphState::Previewing {
            debug!("[TRANSPORT] Stop: Previewing -> Loaded");
            self.state = GraphState::Loaded;
        }
    }

    /// Enter offline mode
    ///
    /// # Errors
    /// * `GraphBusy` - a render is already in progress
    pub fn on_render_begin(&mut self, output_running: bool) -> Result<()> {
        self.busy()?;
        self.state_before_render = Some(self.state);
        self.output_was_running = output_running;
        self.state = GraphState::Rendering;
        debug!(
            "[RENDER-BEGIN] {:?} -> Rendering, output was {}",
            self.state_before_render,
            if output_running { "running" } else { "stopped" }
        );
        Ok(())
    }

    /// Leave offline mode
    ///
    /// Returns whether the live output should be restarted. Calling this
    /// outside a render does nothing and returns `false`.
    pub fn on_render_end(&mut self, unit_count: usize) -> bool {
        if !self.is_rendering() {
            return false;
        }
        self.state = if unit_count > 0 {
            GraphState::Loaded
        } else {
            GraphState::Idle
        };
        let restart = std::mem::take(&mut self.output_was_running);
        debug!(
            "[RENDER-END] Rendering -> {} (was {:?}), restart output: {}",
            self.state,
            self.state_before_render.take(),
            restart
        );
        restart
    }
}
