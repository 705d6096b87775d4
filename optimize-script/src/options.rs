/// Whether the optimization pipeline runs at all. Every pass is skipped as a
/// unit when optimization is off; there are no per-pass toggles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OptLevel {
  Off,
  #[default]
  On,
}

#[derive(Debug, Clone)]
pub struct OptimizerOptions {
  pub level: OptLevel,
  /// Optimize sibling units on the rayon thread pool.
  pub parallel: bool,
  /// Record a snapshot of each unit after every pipeline step.
  pub debug: bool,
}

impl Default for OptimizerOptions {
  fn default() -> Self {
    OptimizerOptions {
      level: OptLevel::On,
      parallel: true,
      debug: false,
    }
  }
}

impl OptimizerOptions {
  pub fn enabled(&self) -> bool {
    self.level == OptLevel::On
  }
}
