#[derive(Debug, Clone)]
pub struct HwInfo {
    pub logical_cpus: usize,
    pub physical_cpus: usize,
}

pub fn detect_hw() -> HwInfo {
    HwInfo {
        logical_cpus: num_cpus::get().max(1),
        physical_cpus: num_cpus::get_physical().max(1),
    }
}
