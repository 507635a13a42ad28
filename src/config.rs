use crate::asm::Remat;

/// Knobs of the register allocator. Built once and handed to [`Allocator::new`].
///
/// [`Allocator::new`]: crate::codegen::reg_alloc::Allocator::new
#[derive(Debug, Clone, PartialEq)]
pub struct AllocatorConfig {
    global_address_spill_priority: f64,
    big_frame_spill_priority: f64,
    small_frame_spill_priority: f64,
    constant_spill_priority: f64,
    use_caller_saved_first: bool,
    merge_spilled_frames: bool,
    sink_enabled: bool,
    sink_min_spill_count: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            global_address_spill_priority: 0.5,
            big_frame_spill_priority: 0.5,
            small_frame_spill_priority: 0.75,
            constant_spill_priority: 0.25,
            use_caller_saved_first: true,
            merge_spilled_frames: true,
            sink_enabled: true,
            sink_min_spill_count: 2,
        }
    }
}

impl AllocatorConfig {
    /// Slots wider than this are "big" frames.
    pub const SMALL_FRAME_BITS: u32 = 64;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn global_address_spill_priority(mut self, priority: f64) -> Self {
        self.global_address_spill_priority = priority;
        self
    }

    pub fn big_frame_spill_priority(mut self, priority: f64) -> Self {
        self.big_frame_spill_priority = priority;
        self
    }

    pub fn small_frame_spill_priority(mut self, priority: f64) -> Self {
        self.small_frame_spill_priority = priority;
        self
    }

    pub fn constant_spill_priority(mut self, priority: f64) -> Self {
        self.constant_spill_priority = priority;
        self
    }

    pub fn use_caller_saved_first(mut self, yes: bool) -> Self {
        self.use_caller_saved_first = yes;
        self
    }

    pub fn merge_spilled_frames(mut self, yes: bool) -> Self {
        self.merge_spilled_frames = yes;
        self
    }

    pub fn sink_enabled(mut self, yes: bool) -> Self {
        self.sink_enabled = yes;
        self
    }

    pub fn sink_min_spill_count(mut self, count: usize) -> Self {
        self.sink_min_spill_count = count;
        self
    }

    pub fn caller_saved_first(&self) -> bool {
        self.use_caller_saved_first
    }

    pub fn merges_spilled_frames(&self) -> bool {
        self.merge_spilled_frames
    }

    pub fn sinks(&self) -> bool {
        self.sink_enabled
    }

    pub fn min_sink_spill_count(&self) -> usize {
        self.sink_min_spill_count
    }

    /// Spill-cost multiplier for a register that can be recomputed from `remat`.
    /// `slot_bits` is the width of the referenced frame slot, if any.
    pub fn remat_priority(&self, remat: &Remat, slot_bits: Option<u32>) -> f64 {
        match remat {
            Remat::Global(_) => self.global_address_spill_priority,
            Remat::Const(_) => self.constant_spill_priority,
            Remat::Frame(_) => match slot_bits {
                Some(bits) if bits > Self::SMALL_FRAME_BITS => self.big_frame_spill_priority,
                _ => self.small_frame_spill_priority,
            },
        }
    }
}
