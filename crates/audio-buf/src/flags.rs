use bitflags::bitflags;

/// Direction of a device's buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dir {
    In,
    Out,
}

impl Dir {
    pub fn label(self) -> &'static str {
        match self {
            Dir::In => "in",
            Dir::Out => "out",
        }
    }
}

bitflags! {
    /// Per-channel mode bits.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct ChannelFlags: u32 {
        const ENABLED = 1 << 0;
        const MUTED = 1 << 1;
        const TONE = 1 << 2;
        const PASS = 1 << 3;
        const METER = 1 << 4;
    }
}

impl Default for ChannelFlags {
    fn default() -> Self {
        ChannelFlags::ENABLED | ChannelFlags::METER
    }
}

bitflags! {
    /// Directions addressed by a single `advance` call.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct IoFlags: u32 {
        const IN = 1 << 0;
        const OUT = 1 << 1;
    }
}

impl From<Dir> for IoFlags {
    fn from(dir: Dir) -> Self {
        match dir {
            Dir::In => IoFlags::IN,
            Dir::Out => IoFlags::OUT,
        }
    }
}
