use std::fmt;
use std::sync::Arc;

use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};

/// Anything the platform layer can hand over as a drawable surface.
pub trait DrawableSurface: HasWindowHandle + HasDisplayHandle + Send + Sync {}

impl<T> DrawableSurface for T where T: HasWindowHandle + HasDisplayHandle + Send + Sync {}

/// Shared, stable handle to the window a swap chain presents into.
///
/// The handle keeps the window alive for as long as a surface created from it.
#[derive(Clone)]
pub struct SurfaceHandle {
    target: Arc<dyn DrawableSurface>,
}

impl SurfaceHandle {
    pub fn new(target: Arc<dyn DrawableSurface>) -> Self {
        Self { target }
    }
}

impl HasWindowHandle for SurfaceHandle {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.target.window_handle()
    }
}

impl HasDisplayHandle for SurfaceHandle {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.target.display_handle()
    }
}

impl fmt::Debug for SurfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceHandle").finish_non_exhaustive()
    }
}
