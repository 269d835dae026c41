/// Command class of a request sent by a controller.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum RequestCommandClass {
    DiscoveryCommand = 0x10,
    GetCommand = 0x20,
    SetCommand = 0x30,
}

/// Command class of a response sent by a responder. Always the request class plus one.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ResponseCommandClass {
    DiscoveryCommandResponse = 0x11,
    GetCommandResponse = 0x21,
    SetCommandResponse = 0x31,
}

impl RequestCommandClass {
    /// Returns the corresponding response class.
    pub fn get_response_class(&self) -> ResponseCommandClass {
        match self {
            Self::DiscoveryCommand => ResponseCommandClass::DiscoveryCommandResponse,
            Self::GetCommand => ResponseCommandClass::GetCommandResponse,
            Self::SetCommand => ResponseCommandClass::SetCommandResponse,
        }
    }
}

impl ResponseCommandClass {
    /// Returns the corresponding request class.
    pub fn get_request_class(&self) -> RequestCommandClass {
        match self {
            Self::DiscoveryCommandResponse => RequestCommandClass::DiscoveryCommand,
            Self::GetCommandResponse => RequestCommandClass::GetCommand,
            Self::SetCommandResponse => RequestCommandClass::SetCommand,
        }
    }
}

impl TryFrom<u8> for RequestCommandClass {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x10 => Ok(Self::DiscoveryCommand),
            0x20 => Ok(Self::GetCommand),
            0x30 => Ok(Self::SetCommand),
            _ => Err(()),
        }
    }
}

impl TryFrom<u8> for ResponseCommandClass {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        RequestCommandClass::try_from(value.wrapping_sub(1))
            .map(|request_class| request_class.get_response_class())
    }
}

/// The command classes a parameter can be accessed with.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PidCommandClass {
    /// Only discovery commands (DISC_UNIQUE_BRANCH, DISC_MUTE, DISC_UN_MUTE).
    Discovery = 0x00,
    Get = 0x01,
    Set = 0x02,
    GetSet = 0x03,
}

impl PidCommandClass {
    /// Returns true if a request with this command class may access the parameter.
    pub fn supports(&self, command_class: RequestCommandClass) -> bool {
        matches!(
            (self, command_class),
            (Self::Discovery, RequestCommandClass::DiscoveryCommand)
                | (Self::Get | Self::GetSet, RequestCommandClass::GetCommand)
                | (Self::Set | Self::GetSet, RequestCommandClass::SetCommand)
        )
    }
}
