pub mod optpass_direct_calls;
pub mod optpass_local_cse;
pub mod optpass_numbers;

#[derive(Default, Clone, Copy, Debug)]
pub struct PassResult {
  pub changed: bool,
  /// Nodes tagged, wrapped or replaced.
  pub rewrites: usize,
}

impl PassResult {
  pub fn any_change(&self) -> bool {
    self.changed
  }

  pub fn mark_changed(&mut self) {
    self.changed = true;
    self.rewrites += 1;
  }

  pub fn merge(&mut self, other: PassResult) {
    self.changed |= other.changed;
    self.rewrites += other.rewrites;
  }
}
