//! Builder surface
//!
//! Expressions are composed with the arithmetic operators on [`Expr`] plus
//! the [`load`] factory; [`KernelBuilder`] collects the stores that make up a
//! kernel's side effects under a single `Combine` root.

use tlang_foundation::Address;

use crate::error::Error;
use crate::node::{Expr, NodeKind};

/// Number of physical streams a kernel can address.
pub const NUM_STREAMS: i64 = 3;

fn check_addr(addr: &Address) -> Result<(), Error> {
    if !addr.initialized() {
        return Err(Error::UninitializedAddress);
    }
    if addr.stream_id >= NUM_STREAMS {
        return Err(Error::StreamOutOfRange(addr.stream_id));
    }
    Ok(())
}

/// A load of one stream element.
///
/// The address must be bound to a stream in `[0, NUM_STREAMS)`; invalid
/// addresses are rejected before any node is constructed.
pub fn load(addr: Address) -> Result<Expr, Error> {
    check_addr(&addr)?;
    let expr = Expr::with_kind(NodeKind::Load);
    expr.borrow_mut().addr = addr;
    Ok(expr)
}

/// Collects stores into the `Combine` root a kernel is compiled from.
///
/// Stores are kept in insertion order; the compiled kernel performs them in
/// that order.
pub struct KernelBuilder {
    root: Expr,
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self {
            root: Expr::with_kind(NodeKind::Combine),
        }
    }

    /// Append a store of `value` to `addr` and return the store expression.
    pub fn store(&mut self, value: &Expr, addr: Address) -> Result<Expr, Error> {
        check_addr(&addr)?;
        let store = Expr::with_kind(NodeKind::Store);
        {
            let mut node = store.borrow_mut();
            node.ch.push(value.clone());
            node.addr = addr;
        }
        self.root.borrow_mut().ch.push(store.clone());
        Ok(store)
    }

    /// Number of stores appended so far.
    pub fn store_count(&self) -> usize {
        self.root.borrow().ch.len()
    }

    /// The `Combine` root holding all stores.
    pub fn finish(self) -> Expr {
        self.root
    }
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self::new()
    }
}
