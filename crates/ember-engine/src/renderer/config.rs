use crate::sync::SyncMode;

/// The single draw issued every frame.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum SceneKind {
    /// Vertex-colored triangle.
    #[default]
    Triangle,
    /// Quad sampling a procedurally generated checkerboard.
    Textured,
}

/// Renderer behavior chosen at startup.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub scene: SceneKind,
    pub sync_mode: SyncMode,
    /// Vertical blanks to wait per present; 0 presents immediately.
    pub vsync_interval: u32,
    /// Back buffer clear color, linear RGBA.
    pub clear_color: [f32; 4],
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            scene: SceneKind::Triangle,
            sync_mode: SyncMode::FullStall,
            vsync_interval: 1,
            clear_color: [0.2, 0.2, 0.2, 1.0],
        }
    }
}
