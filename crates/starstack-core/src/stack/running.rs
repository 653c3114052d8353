use std::sync::Arc;

use crate::align::Wcs;
use crate::pipeline::sub_store::SubId;
use crate::stack::Carry;

/// The alignment anchor of a session.
///
/// Holds the reference sub's own solution (used to compute transforms at full
/// resolution) and the copy expressed on the working grid of the stack. Both
/// are shared handles; they are released together when the session resets.
#[derive(Clone, Debug)]
pub struct ReferenceWcs {
    pub sub: SubId,
    solved: Arc<Wcs>,
    stack_frame: Arc<Wcs>,
}

impl ReferenceWcs {
    pub fn new(sub: SubId, solved: Arc<Wcs>, downscale: usize) -> Self {
        let stack_frame = if downscale > 1 {
            Arc::new(solved.downscaled(downscale))
        } else {
            Arc::clone(&solved)
        };
        Self {
            sub,
            solved,
            stack_frame,
        }
    }

    /// Solution at the resolution the sub was solved at.
    pub fn solved(&self) -> &Arc<Wcs> {
        &self.solved
    }

    /// Solution on the (possibly downscaled) grid of the composite.
    pub fn stack_frame(&self) -> &Arc<Wcs> {
        &self.stack_frame
    }
}

/// Everything the engine keeps about subs it no longer holds in memory.
#[derive(Clone, Debug)]
pub struct RunningStackState {
    pub num_subs: usize,
    pub total_weight: f64,
    pub reference: ReferenceWcs,
    /// Per-strategy state needed to fold in later subs.
    pub carry: Carry,
}

impl RunningStackState {
    pub fn new(
        num_subs: usize,
        total_weight: f64,
        reference: ReferenceWcs,
        carry: Carry,
    ) -> Self {
        Self {
            num_subs,
            total_weight,
            reference,
            carry,
        }
    }

    /// Record a completed incremental pass.
    pub fn absorb(&mut self, added: usize, total_weight: f64, carry: Carry) {
        self.num_subs += added;
        self.total_weight = total_weight;
        self.carry = carry;
    }
}
