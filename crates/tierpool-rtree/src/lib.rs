#![cfg_attr(not(test), no_std)]

//! Fixed-fanout radix tree mapping integer keys to raw descriptor
//! pointers. Interior nodes come from a bump arena and are never freed;
//! removal clears the leaf slot and leaves the path in place for reuse.

use core::ptr::NonNull;

use tierpool_bump::{
  Bump,
  BumpError,
};

#[derive(Debug)]
pub enum RTreeError {
  Bump(BumpError),
  Duplicated,
  KeyRange,
}

impl From<BumpError> for RTreeError {
  fn from(err: BumpError) -> Self {
    RTreeError::Bump(err)
  }
}

pub type RTreeResult<T> = Result<T, RTreeError>;

type OptNull<T> = Option<NonNull<T>>;
type NodePtr<T, const FANOUT: usize> = NonNull<RNode<T, FANOUT>>;

struct RNode<T, const FANOUT: usize> {
  value: OptNull<T>,
  children: [Option<NodePtr<T, FANOUT>>; FANOUT],
}

impl<T, const FANOUT: usize> RNode<T, FANOUT> {
  fn empty() -> Self {
    Self {
      value: None,
      children: [None; FANOUT],
    }
  }
}

pub struct RTree<T, const FANOUT: usize> {
  bump: Bump,
  root: Option<NodePtr<T, FANOUT>>,
  key_bits: usize,
}

impl<T, const FANOUT: usize> RTree<T, FANOUT> {
  const BPL: usize = FANOUT.trailing_zeros() as usize;
  const MASK: usize = FANOUT - 1;

  pub const fn new(chunk_size: usize, key_bits: usize) -> Self {
    assert!(FANOUT.is_power_of_two());
    assert!(key_bits > 0);

    Self {
      bump: Bump::new(chunk_size),
      root: None,
      key_bits,
    }
  }

  const fn levels(&self) -> usize {
    (self.key_bits + Self::BPL - 1) / Self::BPL
  }

  #[inline(always)]
  fn index_for(&self, key: usize, level: usize) -> usize {
    let shift = (self.levels() - 1 - level) * Self::BPL;
    (key >> shift) & Self::MASK
  }

  fn in_range(&self, key: usize) -> bool {
    self.key_bits >= usize::BITS as usize || key < (1usize << self.key_bits)
  }

  fn new_node(&mut self) -> RTreeResult<NodePtr<T, FANOUT>> {
    let node = self.bump.create::<RNode<T, FANOUT>>()?;
    unsafe { node.as_ptr().write(RNode::empty()) };
    Ok(node)
  }

  fn ensure_root(&mut self) -> RTreeResult<NodePtr<T, FANOUT>> {
    if self.root.is_none() {
      self.root = Some(self.new_node()?);
    }
    Ok(self.root.unwrap())
  }

  /// Walks down to the leaf node for `key` without creating anything.
  fn descend(&self, key: usize) -> Option<NodePtr<T, FANOUT>> {
    if !self.in_range(key) {
      return None;
    }

    let mut node = self.root?;
    for level in 0..self.levels() {
      let idx = self.index_for(key, level);
      node = unsafe { node.as_ref() }.children[idx]?;
    }
    Some(node)
  }

  pub fn insert(&mut self, key: usize, val: NonNull<T>) -> RTreeResult<()> {
    if !self.in_range(key) {
      return Err(RTreeError::KeyRange);
    }

    let mut node = self.ensure_root()?;
    for level in 0..self.levels() {
      let idx = self.index_for(key, level);
      let slot = unsafe { node.as_ref() }.children[idx];
      node = match slot {
        Some(child) => child,
        None => {
          let child = self.new_node()?;
          unsafe { node.as_mut() }.children[idx] = Some(child);
          child
        }
      };
    }

    let leaf = unsafe { node.as_mut() };
    if leaf.value.is_some() {
      return Err(RTreeError::Duplicated);
    }
    leaf.value = Some(val);
    Ok(())
  }

  pub fn lookup(&self, key: usize) -> Option<NonNull<T>> {
    let leaf = self.descend(key)?;
    unsafe { leaf.as_ref() }.value
  }

  pub fn remove(&mut self, key: usize) -> Option<NonNull<T>> {
    let mut leaf = self.descend(key)?;
    unsafe { leaf.as_mut() }.value.take()
  }
}

unsafe impl<T, const FANOUT: usize> Send for RTree<T, FANOUT> {}
