//! Binary prefix trie keyed on address bits.

use std::time::Instant;

use crate::remediation::DecisionKind;

/// Addresses are stored left-aligned in a `u128`; IPv4 uses the top 32 bits.
pub(crate) const KEY_BITS: u8 = 128;

/// A range decision held by the trie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeEntry {
    pub kind: DecisionKind,
    pub prefix_len: u8,
    pub expires_at: Instant,
    pub origin: String,
}

impl RangeEntry {
    fn is_active(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone, Default)]
struct Node {
    children: [Option<Box<Node>>; 2],
    entry: Option<RangeEntry>,
}

impl Node {
    fn is_empty(&self) -> bool {
        self.entry.is_none() && self.children.iter().all(Option::is_none)
    }
}

#[inline]
fn bit_at(key: u128, depth: u8) -> usize {
    ((key >> (KEY_BITS - 1 - depth)) & 1) as usize
}

/// Prefix trie for one address family.
///
/// Lookup cost is bounded by the address width, independent of the number
/// of stored prefixes.
#[derive(Debug, Clone, Default)]
pub struct PrefixTrie {
    root: Node,
    len: usize,
}

impl PrefixTrie {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert or replace the entry for `key/entry.prefix_len`.
    pub fn insert(&mut self, key: u128, entry: RangeEntry) -> Option<RangeEntry> {
        let mut node = &mut self.root;
        for depth in 0..entry.prefix_len {
            node = node.children[bit_at(key, depth)].get_or_insert_with(Box::default);
        }
        let previous = node.entry.replace(entry);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    /// Entry stored for exactly `key/prefix_len`, expired or not.
    pub fn get(&self, key: u128, prefix_len: u8) -> Option<&RangeEntry> {
        let mut node = &self.root;
        for depth in 0..prefix_len {
            node = node.children[bit_at(key, depth)].as_deref()?;
        }
        node.entry.as_ref()
    }

    /// Remove the entry for `key/prefix_len`, pruning emptied branches.
    pub fn remove(&mut self, key: u128, prefix_len: u8) -> Option<RangeEntry> {
        let removed = remove_at(&mut self.root, key, 0, prefix_len);
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    /// Best active entry covering `key`.
    ///
    /// `Ban` outranks `Captcha`; among equal kinds the longest prefix wins.
    pub fn lookup(&self, key: u128, now: Instant) -> Option<&RangeEntry> {
        let mut best: Option<&RangeEntry> = None;
        let mut node = &self.root;
        let mut depth = 0;
        loop {
            if let Some(entry) = node.entry.as_ref().filter(|e| e.is_active(now)) {
                // Deeper nodes are longer prefixes, so ties go to the later one
                if best.map_or(true, |b| entry.kind >= b.kind) {
                    best = Some(entry);
                }
            }
            if depth == KEY_BITS {
                break;
            }
            match node.children[bit_at(key, depth)].as_deref() {
                Some(child) => node = child,
                None => break,
            }
            depth += 1;
        }
        best
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let removed = purge_at(&mut self.root, now);
        self.len -= removed;
        removed
    }
}

fn remove_at(node: &mut Node, key: u128, depth: u8, prefix_len: u8) -> Option<RangeEntry> {
    if depth == prefix_len {
        return node.entry.take();
    }
    let slot = &mut node.children[bit_at(key, depth)];
    let child = slot.as_deref_mut()?;
    let removed = remove_at(child, key, depth + 1, prefix_len);
    if child.is_empty() {
        *slot = None;
    }
    removed
}

fn purge_at(node: &mut Node, now: Instant) -> usize {
    let mut removed = 0;
    if node.entry.as_ref().is_some_and(|e| !e.is_active(now)) {
        node.entry = None;
        removed += 1;
    }
    for slot in node.children.iter_mut() {
        if let Some(child) = slot.as_deref_mut() {
            removed += purge_at(child, now);
            if child.is_empty() {
                *slot = None;
            }
        }
    }
    removed
}
