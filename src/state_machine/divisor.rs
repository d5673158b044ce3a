use super::StateMachine;

/// Streams the divisors of a number in non-decreasing order, each one divided out of the
/// remaining value as soon as it is reported.
///
/// Output is computed lazily: every [`poll_output`](StateMachine::poll_output) performs just
/// enough work to find the next divisor.
#[derive(Debug)]
pub struct DivisorSearch {
    remaining: i32,
    divisor: i32,
}

impl DivisorSearch {
    pub fn new() -> Self {
        Self {
            remaining: 1,
            divisor: 2,
        }
    }

    pub fn remaining(&self) -> i32 {
        self.remaining
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining <= 1
    }

    fn start(&mut self, total: i32) {
        self.remaining = total;
        self.divisor = 2;
    }

    fn next_divisor(&mut self) -> Option<i32> {
        while self.remaining > 1 {
            let divisor = self.divisor;

            // Past the square root the remaining value has no smaller divisor left.
            if i64::from(divisor) * i64::from(divisor) > i64::from(self.remaining) {
                let last = self.remaining;
                self.remaining = 1;
                return Some(last);
            }

            if self.remaining % divisor == 0 {
                self.remaining /= divisor;
                return Some(divisor);
            }

            self.divisor += 1;
        }

        None
    }
}

impl Default for DivisorSearch {
    fn default() -> Self {
        Self::new()
    }
}

pub enum DivisorInput {
    Start(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivisorOutput {
    Divisor(i32),
}

impl StateMachine for DivisorSearch {
    type Input = DivisorInput;
    type Output = DivisorOutput;

    fn process_input(&mut self, input: Self::Input) {
        match input {
            DivisorInput::Start(total) => self.start(total),
        }
    }

    fn poll_output(&mut self) -> Option<Self::Output> {
        self.next_divisor().map(DivisorOutput::Divisor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn divisors(total: i32) -> Vec<i32> {
        let mut machine = DivisorSearch::new();
        machine.process_input(DivisorInput::Start(total));

        let mut out = Vec::new();
        while let Some(DivisorOutput::Divisor(d)) = machine.poll_output() {
            out.push(d);
        }
        assert!(machine.is_exhausted());
        out
    }

    #[test]
    fn test_initial_state() {
        let mut machine = DivisorSearch::new();
        assert!(machine.is_exhausted());
        assert!(machine.poll_output().is_none());
    }

    #[test]
    fn test_known_values() {
        assert_eq!(divisors(120), vec![2, 2, 2, 3, 5]);
        assert_eq!(divisors(210), vec![2, 3, 5, 7]);
        assert_eq!(divisors(49), vec![7, 7]);
        assert_eq!(divisors(2), vec![2]);
    }

    #[test]
    fn test_small_and_negative_inputs_emit_nothing() {
        assert!(divisors(1).is_empty());
        assert!(divisors(0).is_empty());
        assert!(divisors(-12).is_empty());
        assert!(divisors(i32::MIN).is_empty());
    }

    #[test]
    fn test_product_and_order() {
        for total in 2..2_000 {
            let out = divisors(total);
            assert_eq!(out.iter().product::<i32>(), total, "product for {total}");
            assert!(out.windows(2).all(|w| w[0] <= w[1]), "order for {total}");
        }
    }

    #[test]
    fn test_large_prime_terminates() {
        assert_eq!(divisors(i32::MAX), vec![i32::MAX]);
        assert_eq!(divisors(2 * 1_073_741_789), vec![2, 1_073_741_789]);
    }

    #[test]
    fn test_restart_resets_search() {
        let mut machine = DivisorSearch::new();
        machine.process_input(DivisorInput::Start(12));
        assert_eq!(machine.poll_output(), Some(DivisorOutput::Divisor(2)));
        assert_eq!(machine.remaining(), 6);

        machine.process_input(DivisorInput::Start(9));
        assert_eq!(machine.poll_output(), Some(DivisorOutput::Divisor(3)));
        assert_eq!(machine.poll_output(), Some(DivisorOutput::Divisor(3)));
        assert_eq!(machine.poll_output(), None);
    }
}
