/// Bus select capability for the card.
///
/// On hardware this drives the (active-low) chip select pin. The emulated card only needs the
/// bookkeeping, but the device still brackets every storage-touching operation with
/// `select`/`deselect` so a transport that does real pin toggling can be slotted in.
pub trait ChipSelect {
    fn select(&mut self);
    fn deselect(&mut self);
    fn is_selected(&self) -> bool;
}

/// Chip select line that only records its level.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectLine {
    pin: u8,
    level_high: bool,
}

impl SelectLine {
    /// A released (high) line on `pin`.
    pub fn new(pin: u8) -> Self {
        Self {
            pin,
            level_high: true,
        }
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }
}

impl ChipSelect for SelectLine {
    fn select(&mut self) {
        self.level_high = false;
    }

    fn deselect(&mut self) {
        self.level_high = true;
    }

    fn is_selected(&self) -> bool {
        !self.level_high
    }
}
