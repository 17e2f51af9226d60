//! Output side of the input engine

/// Receiver of synthetic pointer, key and viewport actions.
///
/// Coordinates are element-local; the implementor maps them onto the
/// framebuffer and decides whether output is allowed at all.
pub trait InputSink {
    /// Pointer state with the full button mask
    fn pointer(&mut self, x: f64, y: f64, mask: u8);

    /// Key press or release
    fn key(&mut self, keysym: u32, code: &str, down: bool);

    /// Move the viewport by a delta (drag-viewport mode)
    fn pan_viewport(&mut self, dx: f64, dy: f64);

    /// Move the locally drawn cursor (touch gestures)
    fn move_cursor(&mut self, _x: f64, _y: f64) {}
}

#[cfg(test)]
pub(crate) mod testing {
    use super::InputSink;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Output {
        Pointer { x: f64, y: f64, mask: u8 },
        Key { keysym: u32, down: bool },
        Pan { dx: f64, dy: f64 },
        Cursor { x: f64, y: f64 },
    }

    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub outputs: Vec<Output>,
    }

    impl RecordingSink {
        pub fn pointers(&self) -> Vec<(f64, f64, u8)> {
            self.outputs
                .iter()
                .filter_map(|o| match o {
                    Output::Pointer { x, y, mask } => Some((*x, *y, *mask)),
                    _ => None,
                })
                .collect()
        }

        pub fn masks(&self) -> Vec<u8> {
            self.pointers().into_iter().map(|(_, _, mask)| mask).collect()
        }
    }

    impl InputSink for RecordingSink {
        fn pointer(&mut self, x: f64, y: f64, mask: u8) {
            self.outputs.push(Output::Pointer { x, y, mask });
        }

        fn key(&mut self, keysym: u32, _code: &str, down: bool) {
            self.outputs.push(Output::Key { keysym, down });
        }

        fn pan_viewport(&mut self, dx: f64, dy: f64) {
            self.outputs.push(Output::Pan { dx, dy });
        }

        fn move_cursor(&mut self, x: f64, y: f64) {
            self.outputs.push(Output::Cursor { x, y });
        }
    }
}
