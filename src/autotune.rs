use crate::hw::HwInfo;
use tracing::warn;

/// Upper bound on decrypt threads.
pub const MAX_CPU_NUM: usize = 1024;
/// Upper bound on admitted jobs; the admission channel allocates this many slots.
pub const MAX_COROUTINE: usize = 65_536;

/// Thread count and admission limit for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tune {
    /// decrypt pool threads
    pub cpu_num: usize,
    /// max jobs admitted at once (C)
    pub coroutine: usize,
}

fn capped(name: &str, n: usize, max: usize) -> usize {
    if n > max {
        warn!(option = name, requested = n, max, "value too large, capped");
        max
    } else {
        n
    }
}

/// `None` means "derive from hardware": half the logical cores for the
/// pool, one more than that for admission. Explicit values are capped at
/// [`MAX_CPU_NUM`] and [`MAX_COROUTINE`].
pub fn resolve(hw: &HwInfo, cpu_num: Option<usize>, coroutine: Option<usize>) -> Tune {
    let cpu_num = cpu_num
        .filter(|n| *n > 0)
        .unwrap_or_else(|| (hw.logical_cpus / 2).max(1));
    let cpu_num = capped("cpu_num", cpu_num, MAX_CPU_NUM);

    let coroutine = coroutine.filter(|n| *n > 0).unwrap_or(cpu_num + 1);
    let coroutine = capped("coroutine", coroutine, MAX_COROUTINE);

    Tune { cpu_num, coroutine }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hw(logical: usize) -> HwInfo {
        HwInfo {
            logical_cpus: logical,
            physical_cpus: logical,
        }
    }

    #[test]
    fn defaults_to_half_the_cores() {
        let t = resolve(&hw(8), None, None);
        assert_eq!(t, Tune { cpu_num: 4, coroutine: 5 });
    }

    #[test]
    fn single_core_still_gets_one_worker() {
        let t = resolve(&hw(1), None, None);
        assert_eq!(t.cpu_num, 1);
        assert_eq!(t.coroutine, 2);
    }

    #[test]
    fn explicit_values_win() {
        let t = resolve(&hw(16), Some(3), Some(7));
        assert_eq!(t, Tune { cpu_num: 3, coroutine: 7 });
    }

    #[test]
    fn zero_means_auto() {
        let t = resolve(&hw(4), Some(0), Some(0));
        assert_eq!(t, Tune { cpu_num: 2, coroutine: 3 });
    }

    #[test]
    fn huge_values_are_capped() {
        let t = resolve(&hw(8), Some(1_000_000_000), Some(1_000_000_000));
        assert_eq!(
            t,
            Tune {
                cpu_num: MAX_CPU_NUM,
                coroutine: MAX_COROUTINE
            }
        );

        let t = resolve(&hw(8), Some(usize::MAX), None);
        assert_eq!(t.cpu_num, MAX_CPU_NUM);
        assert_eq!(t.coroutine, MAX_CPU_NUM + 1);
    }
}
