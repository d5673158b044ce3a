use super::StateMachine;

/// Tracks the running maximum of a stream of numbers, reporting each strictly greater value.
///
/// The machine starts with no maximum at all, so the first number is always reported, negative
/// or not.
#[derive(Debug, Default)]
pub struct RunningMaximum {
    maximum: Option<i32>,
    pending: Option<i32>,
}

impl RunningMaximum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_maximum(&self) -> Option<i32> {
        self.maximum
    }

    fn observe(&mut self, number: i32) {
        if self.maximum.is_none_or(|maximum| number > maximum) {
            self.maximum = Some(number);
            self.pending = Some(number);
        }
    }
}

pub enum MaximumInput {
    Number(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaximumOutput {
    NewMaximum(i32),
}

impl StateMachine for RunningMaximum {
    type Input = MaximumInput;
    type Output = MaximumOutput;

    fn process_input(&mut self, input: Self::Input) {
        match input {
            MaximumInput::Number(number) => self.observe(number),
        }
    }

    fn poll_output(&mut self) -> Option<Self::Output> {
        self.pending.take().map(MaximumOutput::NewMaximum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn maxima(numbers: &[i32]) -> Vec<i32> {
        let mut machine = RunningMaximum::new();
        numbers
            .iter()
            .filter_map(|number| {
                machine.process_input(MaximumInput::Number(*number));
                machine.poll_output().map(|MaximumOutput::NewMaximum(m)| m)
            })
            .collect()
    }

    #[test]
    fn test_initial_state() {
        let mut machine = RunningMaximum::new();
        assert!(machine.current_maximum().is_none());
        assert!(machine.poll_output().is_none());
    }

    #[test]
    fn test_reports_strict_running_maxima() {
        assert_eq!(maxima(&[4, 7, 2, 19, 4, 6, 32]), vec![4, 7, 19, 32]);
        assert_eq!(maxima(&[1, 1, 1]), vec![1]);
        assert_eq!(maxima(&[5, 4, 3]), vec![5]);
    }

    #[test]
    fn test_all_negative_input() {
        assert_eq!(maxima(&[-10, -20, -3, -3, -1]), vec![-10, -3, -1]);
        assert_eq!(maxima(&[i32::MIN, i32::MIN]), vec![i32::MIN]);
    }

    #[test]
    fn test_matches_reference_definition() {
        let numbers = [3, -1, 8, 8, 2, 9, -40, 100, 99, 101];
        let mut expected = Vec::new();
        for (i, n) in numbers.iter().enumerate() {
            if numbers[..i].iter().all(|prev| n > prev) {
                expected.push(*n);
            }
        }
        assert_eq!(maxima(&numbers), expected);
    }
}
