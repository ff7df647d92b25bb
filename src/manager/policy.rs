//! Open/close policy evaluated on every `queue_size` frame.
//!
//! Pure function over the connection's queue-size snapshot — no I/O, no
//! locking — so it is exercised directly in tests rather than through a
//! live socket. Priority order: close first, open second, otherwise no-op.

/// What the connection worker should tell its peer to do, if anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    Open(usize),
    Close(usize),
}

/// S1/S2 thresholds for one connection. Each connected Supermarket gets
/// its own evaluator instance — there is no cross-connection state.
#[derive(Debug, Clone, Copy)]
pub struct ManagerPolicy {
    /// S1 — undercrowded_cash_treshold.
    pub s1_undercrowded: u32,
    /// S2 — overcrowded_cash_treshold.
    pub s2_overcrowded: i64,
}

impl ManagerPolicy {
    /// Evaluates the priority-ordered open/close policy against a `qsize`
    /// snapshot (`-1` meaning that register is closed).
    ///
    /// `undercrowded_count` is counted over every entry in `qsize`, not
    /// just the open ones — this is observationally identical to counting
    /// open-only, since a closed register always reads `-1` and so never
    /// falls in `{0, 1}`. See DESIGN.md for the fuller rationale.
    pub fn evaluate(&self, qsize: &[i64]) -> Action {
        let open_count = qsize.iter().filter(|&&s| s >= 0).count();
        let overcrowded = qsize.iter().any(|&s| s >= self.s2_overcrowded);
        let undercrowded_count = qsize.iter().filter(|&&s| (0..=1).contains(&s)).count() as u32;

        if undercrowded_count >= self.s1_undercrowded && open_count > 1 {
            let least_loaded = qsize
                .iter()
                .enumerate()
                .filter(|(_, &s)| s >= 0)
                .min_by_key(|(_, &s)| s)
                .map(|(i, _)| i)
                .expect("open_count > 1 implies at least one open entry");
            return Action::Close(least_loaded);
        }

        if overcrowded {
            if let Some(first_closed) = qsize.iter().position(|&s| s == -1) {
                return Action::Open(first_closed);
            }
        }

        Action::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ManagerPolicy {
        ManagerPolicy {
            s1_undercrowded: 2,
            s2_overcrowded: 10,
        }
    }

    #[test]
    fn overcrowd_opens_first_closed_register() {
        let action = policy().evaluate(&[3, -1, -1, -1]);
        assert_eq!(action, Action::None);
        let action = policy().evaluate(&[10, -1, -1, -1]);
        assert_eq!(action, Action::Open(1));
    }

    #[test]
    fn undercrowd_closes_least_loaded_open_register() {
        let action = ManagerPolicy {
            s1_undercrowded: 3,
            s2_overcrowded: 10,
        }
        .evaluate(&[0, 0, 0]);
        assert_eq!(action, Action::Close(0));
    }

    #[test]
    fn close_is_suppressed_when_only_one_register_open() {
        let action = policy().evaluate(&[0, -1, -1]);
        assert_eq!(action, Action::None);
    }

    #[test]
    fn close_takes_priority_over_open() {
        // Contrived: both conditions true at once; close must win.
        let action = policy().evaluate(&[0, 1, 10, -1]);
        assert_eq!(action, Action::Close(0));
    }

    #[test]
    fn ties_break_to_lowest_register_id() {
        let action = ManagerPolicy {
            s1_undercrowded: 2,
            s2_overcrowded: 10,
        }
        .evaluate(&[1, 0, 0]);
        assert_eq!(action, Action::Close(1));
    }

    #[test]
    fn no_open_registers_is_a_no_op() {
        let action = policy().evaluate(&[-1, -1]);
        assert_eq!(action, Action::None);
    }
}
