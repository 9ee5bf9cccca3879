use tracing::debug;

use super::classify::{ClassifiedNode, NodeKind};
use crate::config::{ParseConfig, ParseMode};
use crate::error::Diagnostic;

/// One record as cut out of the node stream, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    /// Index of the anchor node that opened the block.
    pub start_index: usize,
    pub country: Option<String>,
    pub product_code: Option<String>,
    pub raw_date_text: Option<String>,
    pub date_index: Option<usize>,
    pub content: Vec<String>,
}

impl RawBlock {
    fn open(start_index: usize, country: Option<String>, product_code: Option<String>) -> Self {
        RawBlock {
            start_index,
            country,
            product_code,
            raw_date_text: None,
            date_index: None,
            content: Vec::new(),
        }
    }

    pub fn content_text(&self) -> String {
        self.content.join(" ")
    }

    fn is_noise(&self) -> bool {
        self.content.is_empty() && self.product_code.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTag {
    Seeking,
    Open,
}

/// Primitive actions a transition is made of, applied in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Finalize the open block, if any, and return to `Seeking`.
    Flush,
    SetCountry,
    OpenBlock,
    /// Set the open block's date from the node, unless it already has one.
    AttachDate,
    /// Append the node's non-anchor text to the open block.
    Append,
    Discard,
}

/// Transition policy for one parsing variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub mode: ParseMode,
    pub skip_first_date: bool,
}

impl Policy {
    pub fn from_config(cfg: &ParseConfig) -> Self {
        Policy {
            mode: cfg.mode,
            skip_first_date: cfg.skips_first_date(),
        }
    }

    /// The transition table. `first_date` is true only for the first
    /// `DateAnchor` of the document.
    pub fn steps(&self, kind: NodeKind, state: StateTag, first_date: bool) -> &'static [Step] {
        use Step::*;
        let skip = first_date && self.skip_first_date;

        match (kind, self.mode, state) {
            (NodeKind::CountryHeader, _, _) => &[Flush, SetCountry],
            (NodeKind::ProductAnchor, _, _) => &[Flush, OpenBlock, AttachDate, Append],

            (NodeKind::DateAnchor, ParseMode::Product, StateTag::Open) if !skip => {
                &[AttachDate, Append]
            }
            (NodeKind::DateAnchor, ParseMode::Product, _) => &[Discard],
            (NodeKind::DateAnchor, ParseMode::Date, _) if skip => &[Flush, Discard],
            (NodeKind::DateAnchor, ParseMode::Date, _) => &[Flush, OpenBlock, AttachDate, Append],

            (NodeKind::ContentNode, _, StateTag::Open) => &[Append],
            (NodeKind::ContentNode, _, StateTag::Seeking) => &[Discard],
        }
    }
}

enum State {
    Seeking,
    Open(RawBlock),
}

impl State {
    fn tag(&self) -> StateTag {
        match self {
            State::Seeking => StateTag::Seeking,
            State::Open(_) => StateTag::Open,
        }
    }
}

#[derive(Debug, Default)]
pub struct Accumulated {
    pub blocks: Vec<RawBlock>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Walks classified nodes in order and cuts them into blocks.
pub struct Accumulator {
    policy: Policy,
    state: State,
    country: Option<String>,
    dates_seen: usize,
    out: Accumulated,
}

impl Accumulator {
    pub fn new(policy: Policy) -> Self {
        Accumulator {
            policy,
            state: State::Seeking,
            country: None,
            dates_seen: 0,
            out: Accumulated::default(),
        }
    }

    pub fn feed(&mut self, node: &ClassifiedNode) {
        let first_date = node.kind == NodeKind::DateAnchor && self.dates_seen == 0;
        if node.kind == NodeKind::DateAnchor {
            self.dates_seen += 1;
        }

        for step in self.policy.steps(node.kind, self.state.tag(), first_date) {
            self.apply(*step, node);
        }
    }

    pub fn finish(mut self) -> Accumulated {
        self.flush();
        self.out
    }

    fn apply(&mut self, step: Step, node: &ClassifiedNode) {
        match step {
            Step::Flush => self.flush(),
            Step::SetCountry => self.country = Some(node.rest.clone()),
            Step::OpenBlock => {
                self.state = State::Open(RawBlock::open(
                    node.index,
                    self.country.clone(),
                    node.code.clone(),
                ));
            }
            Step::AttachDate => {
                if let (State::Open(block), Some(date)) = (&mut self.state, &node.date_text) {
                    if block.raw_date_text.is_none() {
                        block.raw_date_text = Some(date.clone());
                        block.date_index = Some(node.index);
                    } else {
                        debug!(node = node.index, "block already dated, ignoring {}", date);
                    }
                }
            }
            Step::Append => {
                if let State::Open(block) = &mut self.state {
                    if !node.rest.is_empty() {
                        block.content.push(node.rest.clone());
                    }
                }
            }
            Step::Discard => {
                debug!(node = node.index, kind = ?node.kind, "discarded outside of a block");
            }
        }
    }

    fn flush(&mut self) {
        if let State::Open(block) = std::mem::replace(&mut self.state, State::Seeking) {
            if block.is_noise() {
                debug!(node = block.start_index, "empty block discarded");
                self.out.diagnostics.push(Diagnostic::EmptyBlockDiscarded {
                    node_index: block.start_index,
                });
            } else {
                self.out.blocks.push(block);
            }
        }
    }
}

/// Run the state machine over a whole document's classified nodes.
pub fn accumulate(policy: Policy, nodes: &[ClassifiedNode]) -> Accumulated {
    let mut acc = Accumulator::new(policy);
    for node in nodes {
        acc.feed(node);
    }
    acc.finish()
}
