use std::collections::HashSet;

use super::types::{InputEvent, Key, KeyState};

/// Input state for the single window.
///
/// Created with [`InputState::init`] and torn down with
/// [`InputState::shutdown`] by the runtime that owns it.
#[derive(Debug, Default)]
pub struct InputState {
    focused: bool,
    keys_down: HashSet<Key>,
    /// Keys that went down since the last `end_frame`.
    pressed: HashSet<Key>,
    /// Last size reported by the platform.
    size: Option<(u32, u32)>,
    quit: bool,
}

impl InputState {
    pub fn init() -> Self {
        log::debug!("input initialized");
        Self { focused: true, ..Self::default() }
    }

    /// Applies one platform event.
    pub fn apply_event(&mut self, event: &InputEvent) {
        match *event {
            InputEvent::Key { key, state: KeyState::Pressed, repeat } => {
                if self.keys_down.insert(key) && !repeat {
                    self.pressed.insert(key);
                }
                if key == Key::Escape {
                    self.quit = true;
                }
            }
            InputEvent::Key { key, state: KeyState::Released, .. } => {
                self.keys_down.remove(&key);
            }
            InputEvent::Resized { width, height } => {
                // Swap chain resizing is not supported; the size is only recorded.
                log::info!("window resized to {width}x{height}");
                self.size = Some((width, height));
            }
            InputEvent::Focused(focused) => {
                self.focused = focused;
                if !focused {
                    // Avoid stuck keys when focus changes mid-press.
                    self.keys_down.clear();
                }
            }
            InputEvent::CloseRequested => self.quit = true,
        }
    }

    pub fn key_down(&self, key: Key) -> bool {
        self.keys_down.contains(&key)
    }

    /// Whether `key` went down during the current frame.
    pub fn key_pressed(&self, key: Key) -> bool {
        self.pressed.contains(&key)
    }

    pub fn focused(&self) -> bool {
        self.focused
    }

    pub fn last_size(&self) -> Option<(u32, u32)> {
        self.size
    }

    /// Escape or a close request was seen.
    pub fn quit_requested(&self) -> bool {
        self.quit
    }

    /// Clears per-frame transitions.
    pub fn end_frame(&mut self) {
        self.pressed.clear();
    }

    pub fn shutdown(self) {
        log::debug!("input shut down ({} key(s) still held)", self.keys_down.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(key: Key, state: KeyState) -> InputEvent {
        InputEvent::Key { key, state, repeat: false }
    }

    #[test]
    fn escape_requests_quit() {
        let mut input = InputState::init();
        input.apply_event(&key(Key::Space, KeyState::Pressed));
        assert!(!input.quit_requested());
        input.apply_event(&key(Key::Escape, KeyState::Pressed));
        assert!(input.quit_requested());
    }

    #[test]
    fn presses_last_one_frame_and_focus_loss_releases_keys() {
        let mut input = InputState::init();
        input.apply_event(&key(Key::F1, KeyState::Pressed));
        assert!(input.key_pressed(Key::F1));
        input.end_frame();
        assert!(!input.key_pressed(Key::F1));
        assert!(input.key_down(Key::F1));

        input.apply_event(&InputEvent::Focused(false));
        assert!(!input.key_down(Key::F1));
    }

    #[test]
    fn resize_is_recorded() {
        let mut input = InputState::init();
        input.apply_event(&InputEvent::Resized { width: 800, height: 600 });
        assert_eq!(input.last_size(), Some((800, 600)));
    }
}
