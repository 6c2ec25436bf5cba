use crate::model::SuccessTerm;

/// Exit codes observed during a run, in completion order.
#[derive(Debug, Default)]
pub(crate) struct ExitCodes {
    completions: Vec<(usize, i32)>,
}

impl ExitCodes {
    pub(crate) fn record(&mut self, task_id: usize, code: i32) {
        self.completions.push((task_id, code));
    }

    pub(crate) fn len(&self) -> usize {
        self.completions.len()
    }

    /// Reduce the observed codes to one. No observations resolve to 0.
    pub(crate) fn resolve(&self, term: SuccessTerm) -> i32 {
        match term {
            SuccessTerm::All => self
                .completions
                .iter()
                .map(|&(_, code)| code)
                .find(|&code| code != 0)
                .unwrap_or(0),
            // Ids follow submission order, so the lowest id is the first submitted.
            SuccessTerm::First => self
                .completions
                .iter()
                .min_by_key(|&&(id, _)| id)
                .map_or(0, |&(_, code)| code),
            SuccessTerm::Last => self.completions.last().map_or(0, |&(_, code)| code),
        }
    }
}
