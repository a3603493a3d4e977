// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! VFS assistance for flint-core including optimised tree + blit helpers
pub mod dirtree;
pub mod path;
pub mod tree;
