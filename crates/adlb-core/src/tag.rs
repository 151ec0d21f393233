//! Message tag enumeration
//!
//! Every point-to-point message carries one tag. The space is small
//! (well under 128) and split between tags a server receives and tags it
//! emits. Workers receive only the response-side tags plus WORKUNIT.

/// Wire message tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Tag {
    // -- incoming to server --
    Put = 1,
    Get = 2,
    Iget = 3,
    Create = 4,
    StoreHeader = 5,
    StoreSub = 6,
    StorePayload = 7,
    Retrieve = 8,
    Enumerate = 9,
    Subscribe = 10,
    RefcountIncr = 11,
    InsertAtomic = 12,
    Unique = 13,
    Typeof = 14,
    ContainerTypeof = 15,
    ContainerReference = 16,
    ContainerSize = 17,
    Lock = 18,
    Unlock = 19,
    SyncRequest = 20,
    CheckIdle = 21,
    ShutdownWorker = 22,
    ShutdownServer = 23,

    // -- outgoing from server --
    Response = 40,
    ResponsePut = 41,
    ResponseGet = 42,
    SyncResponse = 43,
    Workunit = 44,
    Fail = 45,
}

impl Tag {
    #[inline]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(v: i32) -> Option<Tag> {
        use Tag::*;
        Some(match v {
            1 => Put,
            2 => Get,
            3 => Iget,
            4 => Create,
            5 => StoreHeader,
            6 => StoreSub,
            7 => StorePayload,
            8 => Retrieve,
            9 => Enumerate,
            10 => Subscribe,
            11 => RefcountIncr,
            12 => InsertAtomic,
            13 => Unique,
            14 => Typeof,
            15 => ContainerTypeof,
            16 => ContainerReference,
            17 => ContainerSize,
            18 => Lock,
            19 => Unlock,
            20 => SyncRequest,
            21 => CheckIdle,
            22 => ShutdownWorker,
            23 => ShutdownServer,
            40 => Response,
            41 => ResponsePut,
            42 => ResponseGet,
            43 => SyncResponse,
            44 => Workunit,
            45 => Fail,
            _ => return None,
        })
    }

    /// True for tags a server's main loop dispatches on.
    pub fn is_server_bound(self) -> bool {
        (self as i32) < 40
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for v in 0..64 {
            if let Some(t) = Tag::from_i32(v) {
                assert_eq!(t.as_i32(), v);
            }
        }
        assert_eq!(Tag::from_i32(Tag::SyncRequest.as_i32()), Some(Tag::SyncRequest));
        assert_eq!(Tag::from_i32(99), None);
    }

    #[test]
    fn test_direction() {
        assert!(Tag::Put.is_server_bound());
        assert!(Tag::ShutdownServer.is_server_bound());
        assert!(!Tag::Response.is_server_bound());
        assert!(!Tag::Workunit.is_server_bound());
    }
}
