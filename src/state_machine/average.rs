use super::StateMachine;

/// Accumulates a running sum and count, reporting the mean once the input is finished.
#[derive(Debug, Default)]
pub struct RunningAverage {
    sum: i128,
    count: u64,
    pending: Option<AverageOutput>,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    fn add_sample(&mut self, sample: i64) {
        self.sum += i128::from(sample);
        self.count += 1;
    }

    fn finish(&mut self) {
        let output = if self.count == 0 {
            AverageOutput::NoSamples
        } else {
            AverageOutput::Average(self.sum as f64 / self.count as f64)
        };
        self.pending = Some(output);
    }
}

pub enum AverageInput {
    Sample(i64),
    Finish,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AverageOutput {
    Average(f64),
    /// Finished without a single sample; the mean is undefined.
    NoSamples,
}

impl StateMachine for RunningAverage {
    type Input = AverageInput;
    type Output = AverageOutput;

    fn process_input(&mut self, input: Self::Input) {
        match input {
            AverageInput::Sample(sample) => self.add_sample(sample),
            AverageInput::Finish => self.finish(),
        }
    }

    fn poll_output(&mut self) -> Option<Self::Output> {
        self.pending.take()
    }
}
