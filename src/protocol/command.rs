use std::fmt;

use super::CodecError;

/// Command ids of the AirWater firmware protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandId {
    /// Push the full control state (power, mode, fan speed, ...)
    Control,
    /// Status report sent by the device
    StatusInfo,
    /// Push the full settings state
    Set,
    /// Settings report sent by the device
    SetInfo,
    /// Ask the device to push status reports for a while
    GetStatus,
    Sterilization,
    SterilizationInfo,
}

impl CommandId {
    pub const ALL: [CommandId; 7] = [
        CommandId::Control,
        CommandId::StatusInfo,
        CommandId::Set,
        CommandId::SetInfo,
        CommandId::GetStatus,
        CommandId::Sterilization,
        CommandId::SterilizationInfo,
    ];

    pub fn code(self) -> u32 {
        match self {
            CommandId::Control => 1000,
            CommandId::StatusInfo => 1001,
            CommandId::Set => 1002,
            CommandId::SetInfo => 1003,
            CommandId::GetStatus => 1008,
            CommandId::Sterilization => 1011,
            CommandId::SterilizationInfo => 1012,
        }
    }
}

impl TryFrom<u64> for CommandId {
    type Error = CodecError;

    fn try_from(code: u64) -> Result<Self, Self::Error> {
        CommandId::ALL
            .into_iter()
            .find(|command| u64::from(command.code()) == code)
            .ok_or(CodecError::UnknownCommandId(code))
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}
