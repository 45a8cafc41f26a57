use bytes::Bytes;

use crate::{
    parser::frame::Frame,
    types::{Address, FrameType},
};

pub struct WithAddress(Address);
pub struct WithType(FrameType, Bytes);

pub struct WithNothing;

pub struct FrameBuilder<A = WithNothing, T = WithNothing> {
    address: A,
    kind: T,
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuilder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            address: WithNothing,
            kind: WithNothing,
        }
    }
}

impl<T> FrameBuilder<WithNothing, T> {
    pub fn address(self, dlci: u8, cr: bool) -> FrameBuilder<WithAddress, T> {
        FrameBuilder {
            address: WithAddress(Address::new(dlci, cr)),
            kind: self.kind,
        }
    }
}

impl<A> FrameBuilder<A, WithNothing> {
    fn control(self, frame_type: FrameType) -> FrameBuilder<A, WithType> {
        FrameBuilder {
            address: self.address,
            kind: WithType(frame_type, Bytes::new()),
        }
    }

    pub fn sabm(self) -> FrameBuilder<A, WithType> {
        self.control(FrameType::Sabm)
    }

    pub fn ua(self) -> FrameBuilder<A, WithType> {
        self.control(FrameType::Ua)
    }

    pub fn dm(self) -> FrameBuilder<A, WithType> {
        self.control(FrameType::Dm)
    }

    pub fn disc(self) -> FrameBuilder<A, WithType> {
        self.control(FrameType::Disc)
    }

    pub fn uih(self, payload: Bytes) -> FrameBuilder<A, WithType> {
        FrameBuilder {
            address: self.address,
            kind: WithType(FrameType::Uih, payload),
        }
    }
}

impl FrameBuilder<WithAddress, WithType> {
    /// control frames get the P/F bit, UIH doesn't
    pub fn build(self) -> Frame {
        let WithType(frame_type, payload) = self.kind;

        Frame {
            address: self.address.0,
            frame_type,
            poll_final: frame_type != FrameType::Uih,
            payload,
        }
    }
}
