//! Terminal multiplexer
//!
//! Arranges several PTYs into a tiled layout, tracks which pane has
//! keyboard focus and which panes have exited.

mod layout;

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::{debug, info};

use crate::session::{self, CreateRequest, Registry};
use crate::stream::StreamEvent;

pub use layout::{
    compute_layout, LayoutNode, PaneSpec, PositionedPane, SizeHint, SplitDirection, SplitSpec,
};

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("Layout has no panes")]
    NoPanes,

    #[error("Duplicate pane id: {0}")]
    DuplicatePaneId(String),

    #[error("More than one pane has focus: {0} and {1}")]
    MultipleFocus(String, String),

    #[error("Split {0} has no children")]
    EmptySplit(String),

    #[error("Unknown pane: {0}")]
    UnknownPane(String),

    #[error("Pane {0} does not accept input")]
    NotInteractive(String),

    #[error(transparent)]
    Session(#[from] session::Error),
}

pub type MuxResult<T> = Result<T, MuxError>;

/// Layout, focus and exit state for one multiplexed view
#[derive(Debug)]
pub struct Multiplexer {
    root: LayoutNode,
    width: u16,
    height: u16,
    panes: Vec<PositionedPane>,
    focused: usize,
    exited: HashSet<String>,
    /// pane id -> PTY id, filled by `spawn_all`
    ptys: HashMap<String, String>,
}

impl Multiplexer {
    pub fn new(root: LayoutNode, width: u16, height: u16) -> MuxResult<Self> {
        validate(&root)?;
        let panes = compute_layout(&root, width, height);
        let focused = panes.iter().position(|p| p.pane.focus).unwrap_or(0);
        Ok(Self {
            root,
            width,
            height,
            panes,
            focused,
            exited: HashSet::new(),
            ptys: HashMap::new(),
        })
    }

    pub fn root(&self) -> &LayoutNode {
        &self.root
    }

    pub fn size(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    /// Panes with their current rectangles, in navigation order
    pub fn panes(&self) -> &[PositionedPane] {
        &self.panes
    }

    pub fn pane(&self, pane_id: &str) -> Option<&PositionedPane> {
        self.panes.iter().find(|p| p.id() == pane_id)
    }

    pub fn focused(&self) -> &PositionedPane {
        &self.panes[self.focused]
    }

    pub fn focused_id(&self) -> &str {
        self.focused().id()
    }

    pub fn navigate_next(&mut self) -> &str {
        self.focused = (self.focused + 1) % self.panes.len();
        self.focused_id()
    }

    pub fn navigate_previous(&mut self) -> &str {
        self.focused = (self.focused + self.panes.len() - 1) % self.panes.len();
        self.focused_id()
    }

    pub fn focus(&mut self, pane_id: &str) -> MuxResult<()> {
        let index = self
            .panes
            .iter()
            .position(|p| p.id() == pane_id)
            .ok_or_else(|| MuxError::UnknownPane(pane_id.to_string()))?;
        self.focused = index;
        Ok(())
    }

    /// Record that a pane's process exited. Returns false for unknown panes.
    pub fn mark_exited(&mut self, pane_id: &str) -> bool {
        if self.pane(pane_id).is_none() {
            return false;
        }
        self.exited.insert(pane_id.to_string())
    }

    pub fn is_exited(&self, pane_id: &str) -> bool {
        self.exited.contains(pane_id)
    }

    pub fn all_exited(&self) -> bool {
        self.panes.iter().all(|p| self.exited.contains(p.id()))
    }

    /// Recompute rectangles for a new overall size
    pub fn resize(&mut self, width: u16, height: u16) {
        self.width = width;
        self.height = height;
        self.panes = compute_layout(&self.root, width, height);
    }

    pub fn pty_id(&self, pane_id: &str) -> Option<&str> {
        self.ptys.get(pane_id).map(String::as_str)
    }

    pub fn pane_for_pty(&self, pty_id: &str) -> Option<&str> {
        self.ptys
            .iter()
            .find(|(_, pty)| pty.as_str() == pty_id)
            .map(|(pane, _)| pane.as_str())
    }

    /// Start one PTY per pane, sized to the pane's rectangle
    pub async fn spawn_all(&mut self, registry: &Registry, session_id: &str) -> MuxResult<()> {
        for pane in &self.panes {
            if self.ptys.contains_key(pane.id()) {
                continue;
            }
            let spec = &pane.pane;
            let mut request =
                CreateRequest::new(spec.argv(), pane.width.max(1), pane.height.max(1));
            request.cwd = spec.cwd.clone();
            request.env = spec.env.clone();

            let pty_id = registry.create(session_id, request).await?;
            debug!(pane_id = %spec.id, pty_id = %pty_id, "pane started");
            self.ptys.insert(spec.id.clone(), pty_id);
        }
        info!(session_id = %session_id, panes = self.panes.len(), "multiplexer started");
        Ok(())
    }

    /// Feed a stream event from one of the panes' PTYs.
    ///
    /// Returns true when the event marked its pane as exited.
    pub fn handle_event(&mut self, pty_id: &str, event: &StreamEvent) -> bool {
        if !event.is_exit() {
            return false;
        }
        let Some(pane_id) = self.pane_for_pty(pty_id).map(str::to_string) else {
            return false;
        };
        let marked = self.mark_exited(&pane_id);
        if marked {
            debug!(pane_id = %pane_id, pty_id = %pty_id, "pane exited");
        }
        marked
    }

    /// Resize the layout and every running pane's PTY
    pub fn resize_all(
        &mut self,
        registry: &Registry,
        session_id: &str,
        width: u16,
        height: u16,
    ) -> MuxResult<()> {
        self.resize(width, height);
        for pane in &self.panes {
            if self.exited.contains(pane.id()) {
                continue;
            }
            if let Some(pty_id) = self.ptys.get(pane.id()) {
                registry.resize(session_id, pty_id, pane.width.max(1), pane.height.max(1))?;
            }
        }
        Ok(())
    }

    /// Write input to the focused pane's PTY
    pub fn send_to_focused(
        &self,
        registry: &Registry,
        session_id: &str,
        data: &[u8],
    ) -> MuxResult<()> {
        let pane = self.focused();
        if !pane.pane.interactive {
            return Err(MuxError::NotInteractive(pane.id().to_string()));
        }
        let pty_id = self
            .ptys
            .get(pane.id())
            .ok_or_else(|| MuxError::UnknownPane(pane.id().to_string()))?;
        registry.input(session_id, pty_id, data)?;
        Ok(())
    }
}

fn validate(root: &LayoutNode) -> MuxResult<()> {
    check_splits(root)?;

    let panes = root.panes();
    if panes.is_empty() {
        return Err(MuxError::NoPanes);
    }

    let mut seen = HashSet::new();
    let mut focused: Option<&str> = None;
    for pane in panes {
        if !seen.insert(pane.id.as_str()) {
            return Err(MuxError::DuplicatePaneId(pane.id.clone()));
        }
        if pane.focus {
            if let Some(first) = focused {
                return Err(MuxError::MultipleFocus(first.to_string(), pane.id.clone()));
            }
            focused = Some(pane.id.as_str());
        }
    }
    Ok(())
}

fn check_splits(node: &LayoutNode) -> MuxResult<()> {
    if let LayoutNode::Split(split) = node {
        if split.children.is_empty() {
            return Err(MuxError::EmptySplit(split.id.clone()));
        }
        for child in &split.children {
            check_splits(child)?;
        }
    }
    Ok(())
}
