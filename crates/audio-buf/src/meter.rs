/// Ring of per-callback mean-square values; the meter reading is the root of
/// their mean, i.e. an RMS level windowed over the meter period.
#[derive(Debug)]
pub(crate) struct MeterRing {
    slots: Box<[f32]>,
    cursor: usize,
    sum: f64,
}

impl MeterRing {
    pub(crate) fn new(slots: usize) -> Self {
        Self {
            slots: vec![0.0; slots.max(1)].into_boxed_slice(),
            cursor: 0,
            sum: 0.0,
        }
    }

    /// Slot count covering `meter_ms` when one slot is filled per device cycle.
    pub(crate) fn slots_for(meter_ms: u32, device_rate: f64, cycle_frames: usize) -> usize {
        if cycle_frames == 0 || device_rate <= 0.0 {
            return 1;
        }
        let period_frames = device_rate * f64::from(meter_ms) / 1000.0;
        (period_frames / cycle_frames as f64).ceil().max(1.0) as usize
    }

    /// Stores the mean square of one callback and returns the updated RMS.
    pub(crate) fn push(&mut self, sum_of_squares: f64, frames: usize) -> f32 {
        let power = if frames == 0 {
            0.0
        } else {
            (sum_of_squares / frames as f64) as f32
        };
        self.sum += f64::from(power) - f64::from(self.slots[self.cursor]);
        self.slots[self.cursor] = power;
        self.cursor = (self.cursor + 1) % self.slots.len();
        // The running sum drifts by rounding; resynchronise once per lap.
        if self.cursor == 0 {
            self.sum = self.slots.iter().map(|&p| f64::from(p)).sum();
        }
        (self.sum.max(0.0) / self.slots.len() as f64).sqrt() as f32
    }
}
