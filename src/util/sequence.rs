/// Hands out sequence numbers for outgoing requests.
///
/// Numbers wrap around after `u32::MAX`. The starting point is random so that a restarted process
///  is unlikely to reuse numbers a peer still associates with the previous incarnation.
#[derive(Debug)]
pub struct SequenceNumbers {
    next: u32,
}

impl SequenceNumbers {
    pub fn new() -> SequenceNumbers {
        Self::starting_at(rand::random())
    }

    pub fn starting_at(first: u32) -> SequenceNumbers {
        SequenceNumbers {
            next: first,
        }
    }

    pub fn next_sequence_number(&mut self) -> u32 {
        let result = self.next;
        self.next = self.next.wrapping_add(1);
        result
    }
}

impl Default for SequenceNumbers {
    fn default() -> Self {
        Self::new()
    }
}
