//! Pane layout
//!
//! A layout is a tree of splits with panes at the leaves. Computing it
//! assigns every pane a rectangle; the rectangles tile the root exactly.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Axis a split divides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitDirection {
    /// Children side by side, dividing the width
    Horizontal,
    /// Children stacked, dividing the height
    Vertical,
}

/// Requested extent of a node along its parent's split axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSize", into = "RawSize")]
pub enum SizeHint {
    /// Absolute number of cells
    Cells(u16),
    /// Percentage of the parent extent
    Percent(f64),
    /// `num/den` of the parent extent
    Fraction { num: u32, den: u32 },
}

impl SizeHint {
    /// Cells requested out of `extent`
    pub fn resolve(self, extent: u16) -> u16 {
        let cells = match self {
            SizeHint::Cells(cells) => u64::from(cells),
            SizeHint::Percent(percent) => (f64::from(extent) * percent / 100.0).floor() as u64,
            SizeHint::Fraction { num, den } => u64::from(extent) * u64::from(num) / u64::from(den),
        };
        cells.min(u64::from(extent)) as u16
    }
}

impl fmt::Display for SizeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeHint::Cells(cells) => write!(f, "{cells}"),
            SizeHint::Percent(percent) => write!(f, "{percent}%"),
            SizeHint::Fraction { num, den } => write!(f, "{num}/{den}"),
        }
    }
}

/// Wire form: a JSON number or a `"30%"` / `"1/3"` string
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawSize {
    Number(u64),
    Text(String),
}

impl TryFrom<RawSize> for SizeHint {
    type Error = String;

    fn try_from(raw: RawSize) -> Result<Self, Self::Error> {
        match raw {
            RawSize::Number(cells) => u16::try_from(cells)
                .map(SizeHint::Cells)
                .map_err(|_| format!("size {cells} is too large")),
            RawSize::Text(text) => text.parse(),
        }
    }
}

impl From<SizeHint> for RawSize {
    fn from(hint: SizeHint) -> Self {
        match hint {
            SizeHint::Cells(cells) => RawSize::Number(u64::from(cells)),
            other => RawSize::Text(other.to_string()),
        }
    }
}

impl std::str::FromStr for SizeHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(percent) = s.strip_suffix('%') {
            let percent: f64 = percent
                .trim()
                .parse()
                .map_err(|_| format!("invalid percentage {s:?}"))?;
            if !(0.0..=100.0).contains(&percent) {
                return Err(format!("percentage out of range: {s:?}"));
            }
            return Ok(SizeHint::Percent(percent));
        }
        if let Some((num, den)) = s.split_once('/') {
            let num: u32 = num
                .trim()
                .parse()
                .map_err(|_| format!("invalid fraction {s:?}"))?;
            let den: u32 = den
                .trim()
                .parse()
                .map_err(|_| format!("invalid fraction {s:?}"))?;
            if den == 0 || num > den {
                return Err(format!("fraction out of range: {s:?}"));
            }
            return Ok(SizeHint::Fraction { num, den });
        }
        s.parse()
            .map(SizeHint::Cells)
            .map_err(|_| format!("invalid size {s:?}"))
    }
}

fn default_true() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// A leaf of the layout, backed by one PTY
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaneSpec {
    pub id: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<SizeHint>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub focus: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Whether the pane accepts keyboard input
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub interactive: bool,
}

impl PaneSpec {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            size: None,
            focus: false,
            title: None,
            interactive: true,
        }
    }

    /// Title shown for the pane, the command when unset
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.command)
    }

    /// Full argv
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.command.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitSpec {
    pub id: String,
    pub direction: SplitDirection,
    pub children: Vec<LayoutNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<SizeHint>,
}

/// Layout tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LayoutNode {
    Pane(PaneSpec),
    Split(SplitSpec),
}

impl LayoutNode {
    pub fn id(&self) -> &str {
        match self {
            LayoutNode::Pane(pane) => &pane.id,
            LayoutNode::Split(split) => &split.id,
        }
    }

    pub fn size(&self) -> Option<SizeHint> {
        match self {
            LayoutNode::Pane(pane) => pane.size,
            LayoutNode::Split(split) => split.size,
        }
    }

    /// Leaves in pre-order
    pub fn panes(&self) -> Vec<&PaneSpec> {
        let mut panes = Vec::new();
        collect_panes(self, &mut panes);
        panes
    }
}

fn collect_panes<'a>(node: &'a LayoutNode, out: &mut Vec<&'a PaneSpec>) {
    match node {
        LayoutNode::Pane(pane) => out.push(pane),
        LayoutNode::Split(split) => {
            for child in &split.children {
                collect_panes(child, out);
            }
        }
    }
}

/// A pane with its computed rectangle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionedPane {
    #[serde(flatten)]
    pub pane: PaneSpec,
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    /// Position in pre-order, used for navigation
    pub index: usize,
}

impl PositionedPane {
    pub fn id(&self) -> &str {
        &self.pane.id
    }

    pub fn area(&self) -> u32 {
        u32::from(self.width) * u32::from(self.height)
    }
}

#[derive(Debug, Clone, Copy)]
struct Rect {
    x: u16,
    y: u16,
    width: u16,
    height: u16,
}

/// Assign every pane of `root` a rectangle inside `width × height`
pub fn compute_layout(root: &LayoutNode, width: u16, height: u16) -> Vec<PositionedPane> {
    let mut out = Vec::new();
    place(
        root,
        Rect {
            x: 0,
            y: 0,
            width,
            height,
        },
        &mut out,
    );
    out
}

fn place(node: &LayoutNode, rect: Rect, out: &mut Vec<PositionedPane>) {
    match node {
        LayoutNode::Pane(pane) => {
            let index = out.len();
            out.push(PositionedPane {
                pane: pane.clone(),
                x: rect.x,
                y: rect.y,
                width: rect.width,
                height: rect.height,
                index,
            });
        }
        LayoutNode::Split(split) => {
            let extent = match split.direction {
                SplitDirection::Horizontal => rect.width,
                SplitDirection::Vertical => rect.height,
            };
            let sizes = distribute(&split.children, extent);

            let mut offset = 0u16;
            for (child, size) in split.children.iter().zip(sizes) {
                let child_rect = match split.direction {
                    SplitDirection::Horizontal => Rect {
                        x: rect.x + offset,
                        width: size,
                        ..rect
                    },
                    SplitDirection::Vertical => Rect {
                        y: rect.y + offset,
                        height: size,
                        ..rect
                    },
                };
                place(child, child_rect, out);
                offset += size;
            }
        }
    }
}

/// Split `extent` among children: sized children first (clamped to what
/// is left), then equal shares for the rest. The last child takes the
/// remainder, so the sizes always sum to `extent`.
fn distribute(children: &[LayoutNode], extent: u16) -> Vec<u16> {
    if children.is_empty() {
        return Vec::new();
    }

    let mut sizes = vec![0u16; children.len()];
    let mut remaining = extent;
    let mut unsized_count = 0u16;
    for (size, child) in sizes.iter_mut().zip(children) {
        match child.size() {
            Some(hint) => {
                *size = hint.resolve(extent).min(remaining);
                remaining -= *size;
            }
            None => unsized_count += 1,
        }
    }

    if unsized_count > 0 {
        let share = remaining / unsized_count;
        for (size, child) in sizes.iter_mut().zip(children) {
            if child.size().is_none() {
                *size = share;
            }
        }
    }

    let assigned: u16 = sizes.iter().sum();
    if let Some(last) = sizes.last_mut() {
        *last += extent - assigned;
    }
    sizes
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pane(id: &str) -> LayoutNode {
        LayoutNode::Pane(PaneSpec::new(id, "sh"))
    }

    fn sized(id: &str, size: SizeHint) -> LayoutNode {
        let mut spec = PaneSpec::new(id, "sh");
        spec.size = Some(size);
        LayoutNode::Pane(spec)
    }

    fn split(id: &str, direction: SplitDirection, children: Vec<LayoutNode>) -> LayoutNode {
        LayoutNode::Split(SplitSpec {
            id: id.to_string(),
            direction,
            children,
            size: None,
        })
    }

    fn rects(panes: &[PositionedPane]) -> Vec<(&str, u16, u16, u16, u16)> {
        panes
            .iter()
            .map(|p| (p.id(), p.x, p.y, p.width, p.height))
            .collect()
    }

    #[test]
    fn test_single_pane_fills_root() {
        let panes = compute_layout(&pane("a"), 80, 24);
        assert_eq!(rects(&panes), vec![("a", 0, 0, 80, 24)]);
        assert_eq!(panes[0].index, 0);
    }

    #[test]
    fn test_horizontal_split_divides_width() {
        let root = split(
            "root",
            SplitDirection::Horizontal,
            vec![pane("a"), pane("b"), pane("c")],
        );
        let panes = compute_layout(&root, 80, 24);
        assert_eq!(
            rects(&panes),
            vec![
                ("a", 0, 0, 26, 24),
                ("b", 26, 0, 26, 24),
                ("c", 52, 0, 28, 24),
            ]
        );
    }

    #[test]
    fn test_vertical_split_with_hints() {
        let root = split(
            "root",
            SplitDirection::Vertical,
            vec![
                sized("top", SizeHint::Percent(25.0)),
                pane("middle"),
                sized("bottom", SizeHint::Cells(4)),
            ],
        );
        let panes = compute_layout(&root, 80, 24);
        assert_eq!(
            rects(&panes),
            vec![
                ("top", 0, 0, 80, 6),
                ("middle", 0, 6, 80, 14),
                ("bottom", 0, 20, 80, 4),
            ]
        );
    }

    #[test]
    fn test_oversized_children_are_clamped() {
        let root = split(
            "root",
            SplitDirection::Horizontal,
            vec![
                sized("a", SizeHint::Cells(70)),
                sized("b", SizeHint::Cells(70)),
                pane("c"),
            ],
        );
        let panes = compute_layout(&root, 80, 10);
        assert_eq!(
            rects(&panes),
            vec![("a", 0, 0, 70, 10), ("b", 70, 0, 10, 10), ("c", 80, 0, 0, 10)]
        );
    }

    #[test]
    fn test_preorder_indexes() {
        let root = split(
            "root",
            SplitDirection::Horizontal,
            vec![
                split("left", SplitDirection::Vertical, vec![pane("a"), pane("b")]),
                pane("c"),
            ],
        );
        let panes = compute_layout(&root, 80, 24);
        let order: Vec<_> = panes.iter().map(|p| (p.id(), p.index)).collect();
        assert_eq!(order, vec![("a", 0), ("b", 1), ("c", 2)]);
        assert_eq!(rects(&panes)[1], ("b", 0, 12, 40, 12));
    }

    #[test]
    fn test_size_hint_parsing() {
        assert_eq!("30%".parse::<SizeHint>(), Ok(SizeHint::Percent(30.0)));
        assert_eq!(
            "1/3".parse::<SizeHint>(),
            Ok(SizeHint::Fraction { num: 1, den: 3 })
        );
        assert_eq!("12".parse::<SizeHint>(), Ok(SizeHint::Cells(12)));
        assert!("1/0".parse::<SizeHint>().is_err());
        assert!("150%".parse::<SizeHint>().is_err());
        assert!("wide".parse::<SizeHint>().is_err());
        assert_eq!(SizeHint::Fraction { num: 1, den: 3 }.resolve(90), 30);
    }

    #[test]
    fn test_layout_json() {
        let json = r#"{
            "type": "split",
            "id": "root",
            "direction": "horizontal",
            "children": [
                {"type": "pane", "id": "editor", "command": "vim", "size": "2/3", "focus": true},
                {"type": "split", "id": "right", "direction": "vertical", "children": [
                    {"type": "pane", "id": "shell", "command": "bash", "args": ["-l"], "size": 10},
                    {"type": "pane", "id": "logs", "command": "tail", "interactive": false}
                ]}
            ]
        }"#;
        let root: LayoutNode = serde_json::from_str(json).unwrap();
        let panes = root.panes();
        assert_eq!(panes.len(), 3);
        assert!(panes[0].focus);
        assert_eq!(panes[0].size, Some(SizeHint::Fraction { num: 2, den: 3 }));
        assert_eq!(panes[1].size, Some(SizeHint::Cells(10)));
        assert!(!panes[2].interactive);

        let reparsed: LayoutNode =
            serde_json::from_str(&serde_json::to_string(&root).unwrap()).unwrap();
        assert_eq!(reparsed, root);
    }

    fn arb_hint() -> impl Strategy<Value = Option<SizeHint>> {
        prop_oneof![
            Just(None),
            (0u16..200).prop_map(|c| Some(SizeHint::Cells(c))),
            (0u32..=100).prop_map(|p| Some(SizeHint::Percent(f64::from(p)))),
            (1u32..6)
                .prop_flat_map(|den| (0..=den, Just(den)))
                .prop_map(|(num, den)| Some(SizeHint::Fraction { num, den })),
        ]
    }

    fn arb_layout() -> impl Strategy<Value = LayoutNode> {
        let leaf = arb_hint().prop_map(|size| {
            let mut spec = PaneSpec::new("p", "sh");
            spec.size = size;
            LayoutNode::Pane(spec)
        });
        leaf.prop_recursive(4, 32, 5, |inner| {
            (
                prop::bool::ANY,
                prop::collection::vec(inner, 1..5),
                arb_hint(),
            )
                .prop_map(|(horizontal, children, size)| {
                    LayoutNode::Split(SplitSpec {
                        id: "s".into(),
                        direction: if horizontal {
                            SplitDirection::Horizontal
                        } else {
                            SplitDirection::Vertical
                        },
                        children,
                        size,
                    })
                })
        })
    }

    proptest! {
        #[test]
        fn prop_layout_tiles_root(root in arb_layout(), width in 0u16..300, height in 0u16..120) {
            let panes = compute_layout(&root, width, height);
            prop_assert_eq!(panes.len(), root.panes().len());

            let total: u32 = panes.iter().map(PositionedPane::area).sum();
            prop_assert_eq!(total, u32::from(width) * u32::from(height));

            for pane in &panes {
                prop_assert!(pane.x + pane.width <= width);
                prop_assert!(pane.y + pane.height <= height);
            }
            for (i, a) in panes.iter().enumerate() {
                for b in &panes[i + 1..] {
                    let disjoint = a.x + a.width <= b.x
                        || b.x + b.width <= a.x
                        || a.y + a.height <= b.y
                        || b.y + b.height <= a.y;
                    prop_assert!(disjoint, "{:?} overlaps {:?}", a, b);
                }
            }
        }
    }
}
