// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

/// Marks the byte offset within the archive where a content payload's
/// deduplicated file blob begins. The reader seeks here and streams bytes
/// out on demand rather than buffering the whole payload up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StonePayloadContent {
    pub offset: u64,
}
