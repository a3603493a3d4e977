// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

pub(crate) mod ext;
mod header;
mod payload;
mod read;

pub use self::header::{
    StoneAgnosticHeader, StoneHeader, StoneHeaderDecodeError, StoneHeaderV1, StoneHeaderV1DecodeError,
    StoneHeaderV1FileType, StoneHeaderVersion, STONE_HEADER_MAGIC,
};
pub use self::payload::{
    StonePayload, StonePayloadAttribute, StonePayloadCompression, StonePayloadContent, StonePayloadDecodeError,
    StonePayloadEncodeError, StonePayloadHeader, StonePayloadIndex, StonePayloadKind, StonePayloadLayout,
    StonePayloadLayoutEntry, StonePayloadLayoutFileType, StonePayloadMeta, StonePayloadMetaDependency,
    StonePayloadMetaKind, StonePayloadMetaTag,
};
pub use self::read::{read, read_bytes, StoneDecodedPayload, StoneReadError, StoneReader};
