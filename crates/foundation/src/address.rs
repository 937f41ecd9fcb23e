//! Stream addressing model
//!
//! An [`Address`] describes where a logical stream element lives: which
//! physical stream it belongs to and how the logical `(i, n)` pair (inner
//! loop index, loop bound) maps to a physical offset inside that stream.
//!
//! The mapping is affine in `i` and `n`, with an optional AOSOA
//! (array-of-structures-of-arrays) skew: when `coeff_aosoa_stride` is
//! non-zero, every `coeff_aosoa_group_size` elements introduce an extra
//! constant stride.

use serde::{Deserialize, Serialize};

/// Sentinel stream id for addresses that have not been bound to a stream.
const UNBOUND: i64 = -1;

/// Location of a logical stream element.
///
/// The effective offset for a given `(i, n)` is
///
/// ```text
/// coeff_i * i + coeff_imax * n + coeff_const
///     [+ (i / coeff_aosoa_group_size) * coeff_aosoa_stride]
/// ```
///
/// where the AOSOA term only applies when `coeff_aosoa_stride != 0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Physical stream this address points into. Negative means unbound.
    pub stream_id: i64,
    /// Per-element stride (multiplier of the inner loop index `i`).
    pub coeff_i: i64,
    /// Per-bound stride (multiplier of the loop bound `n`).
    pub coeff_imax: i64,
    /// Constant offset.
    pub coeff_const: i64,
    /// AOSOA group size; zero means the layout is unspecified and will be
    /// filled in by the vectorizer.
    pub coeff_aosoa_group_size: i64,
    /// AOSOA stride applied once per group. Zero disables the skew.
    pub coeff_aosoa_stride: i64,
}

impl Address {
    /// An address bound to `stream_id` with all coefficients zero.
    pub fn stream(stream_id: i64) -> Self {
        Self {
            stream_id,
            ..Self::unbound()
        }
    }

    /// An unbound address (sentinel stream id).
    pub fn unbound() -> Self {
        Self {
            stream_id: UNBOUND,
            coeff_i: 0,
            coeff_imax: 0,
            coeff_const: 0,
            coeff_aosoa_group_size: 0,
            coeff_aosoa_stride: 0,
        }
    }

    pub fn with_coeff_i(mut self, coeff_i: i64) -> Self {
        self.coeff_i = coeff_i;
        self
    }

    pub fn with_imax(mut self, coeff_imax: i64) -> Self {
        self.coeff_imax = coeff_imax;
        self
    }

    pub fn with_offset(mut self, coeff_const: i64) -> Self {
        self.coeff_const = coeff_const;
        self
    }

    pub fn with_aosoa(mut self, group_size: i64, stride: i64) -> Self {
        self.coeff_aosoa_group_size = group_size;
        self.coeff_aosoa_stride = stride;
        self
    }

    /// Whether this address has been bound to a stream.
    pub fn initialized(&self) -> bool {
        self.stream_id >= 0
    }

    /// The constant offset of this address.
    pub fn offset(&self) -> i64 {
        self.coeff_const
    }

    /// Two addresses are *same-type* when they agree on every coefficient
    /// except the constant offset. Same-type addresses walk the same stream
    /// with the same strides and only differ in where they start.
    pub fn same_type(&self, other: &Address) -> bool {
        self.stream_id == other.stream_id
            && self.coeff_i == other.coeff_i
            && self.coeff_imax == other.coeff_imax
            && self.coeff_aosoa_group_size == other.coeff_aosoa_group_size
            && self.coeff_aosoa_stride == other.coeff_aosoa_stride
    }

    /// Whether `other` addresses the element immediately after `self`:
    /// same-type and exactly one element further along.
    pub fn prior_to(&self, other: &Address) -> bool {
        self.same_type(other) && self.offset() + 1 == other.offset()
    }

    /// Evaluate the physical offset for a logical `(i, n)` pair.
    pub fn eval(&self, i: i64, n: i64) -> i64 {
        debug_assert!(self.initialized());
        if self.coeff_aosoa_stride != 0 {
            self.coeff_i * i
                + self.coeff_imax * n
                + self.coeff_const
                + (i / self.coeff_aosoa_group_size) * self.coeff_aosoa_stride
        } else {
            self.coeff_i * i + self.coeff_imax * n + self.coeff_const
        }
    }
}
