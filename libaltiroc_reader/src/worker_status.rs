#[derive(Debug, Clone, Default)]
pub enum BarColor {
    #[default]
    CYAN,
    MAGENTA,
    RED,
    GREEN,
}

/// Progress report sent from a processing task to whatever drives the UI.
#[derive(Debug, Clone, Default)]
pub struct TaskStatus {
    pub progress: f32,
    pub file_index: usize,
    pub color: BarColor,
}

impl TaskStatus {
    pub fn new(progress: f32, file_index: usize, color: BarColor) -> Self {
        Self {
            progress,
            file_index,
            color,
        }
    }
}
