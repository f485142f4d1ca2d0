/// Class names of the default single-class vehicle model.
pub const NAMES: [&str; 1] = ["car"];
