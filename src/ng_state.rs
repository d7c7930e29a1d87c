/// UI feedback token surfaced to the operator indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NgState {
    Stop,
    Progress,
    Ng,
    Ok,
}
