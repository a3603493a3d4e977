// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Installed-state text database codec (§4.4).
//!
//! A record is a run of `letter:value` lines terminated by a blank line.
//! Capital (and a handful of reserved lowercase) letters carry the package's
//! index-header metadata; the remaining lowercase letters carry
//! installed-state: directory claims, files, ACLs and checksums. The
//! concrete letter-to-field mapping below is this crate's own
//! (`pkg_add_info` is named in spec.md §4.4 as a delegated component this
//! crate owns for [`crate::package::Meta`]); the six reserved installed-state
//! letters (`F M R a Z r q s f`) are exactly as spec.md's field table gives
//! them and must not be reassigned.

use std::rc::Rc;

use thiserror::Error;
use vfs::dirtree::{AclValue, Checksum, DirInstance, DirTree, FileEntry};

use crate::dependency::{Dependency, Provider};
use crate::package::{Digest, InstalledPackage, Meta, Package};
use crate::registry::Registry;

#[derive(Debug, Error)]
pub enum Error {
    #[error("line {line}: {message}")]
    Format { line: usize, message: String },
}

impl Error {
    fn at(line: usize, message: impl Into<String>) -> Self {
        Error::Format {
            line,
            message: message.into(),
        }
    }
}

/// Read every record in `content` into `registry`/`tree`, attaching dir
/// instances and files to `layer`. Malformed lines abort the whole read
/// (§4.4 failure model); `force_old_apk` downgrades unknown `f:` flag
/// letters from fatal to ignored.
pub fn read_installed(content: &str, registry: &mut Registry, tree: &mut DirTree, layer: u8, force_old_apk: bool) -> Result<(), Error> {
    let mut builder = RecordBuilder::default();

    for (idx, raw_line) in content.lines().enumerate() {
        let line_no = idx + 1;

        if raw_line.is_empty() {
            builder.finish(registry, layer, line_no)?;
            builder = RecordBuilder::default();
            continue;
        }

        let (key, value) = raw_line
            .split_once(':')
            .ok_or_else(|| Error::at(line_no, "missing ':' separator"))?;

        if key.is_empty() {
            return Err(Error::at(line_no, "empty field letter"));
        }

        match key {
            "F" => builder.begin_dir(tree, value, line_no)?,
            "M" => builder.set_dir_acl(tree, parse_acl(value, line_no)?),
            "R" => builder.begin_file(tree, value),
            "a" => builder.set_file_acl(tree, parse_acl(value, line_no)?),
            "Z" => builder.set_checksum(parse_checksum(value, line_no)?),
            _ => builder.apply(key, value, force_old_apk, line_no)?,
        }
    }

    builder.finish(registry, layer, content.lines().count())?;

    Ok(())
}

/// Serialize every installed package belonging to `layer`, in
/// (name, version) display order (§5 "Ordering").
pub fn write_installed(registry: &Registry, layer: u8) -> String {
    let mut packages: Vec<&Package> = registry.packages().filter(|p| p.layer == layer && p.is_installed()).collect();
    packages.sort_by(|a, b| (&a.meta.name, &a.meta.version_identifier).cmp(&(&b.meta.name, &b.meta.version_identifier)));

    let mut out = String::new();
    for pkg in packages {
        write_record(&mut out, pkg);
    }
    out
}

fn write_record(out: &mut String, pkg: &Package) {
    use std::fmt::Write as _;

    let _ = writeln!(out, "X:{}", pkg.digest);
    let _ = writeln!(out, "P:{}", pkg.meta.name);
    let _ = writeln!(out, "V:{}", pkg.meta.version_identifier);
    let _ = writeln!(out, "B:{}", pkg.meta.source_release);
    let _ = writeln!(out, "b:{}", pkg.meta.build_release);
    let _ = writeln!(out, "A:{}", pkg.meta.architecture);
    let _ = writeln!(out, "U:{}", pkg.meta.summary);
    let _ = writeln!(out, "D:{}", escape(&pkg.meta.description));
    let _ = writeln!(out, "O:{}", pkg.meta.source_id);
    let _ = writeln!(out, "H:{}", pkg.meta.homepage);
    for license in &pkg.meta.licenses {
        let _ = writeln!(out, "L:{license}");
    }
    if let Some(size) = pkg.meta.installed_size {
        let _ = writeln!(out, "I:{size}");
    }
    let _ = writeln!(out, "T:{}", pkg.meta.build_time);
    for dep in &pkg.meta.dependencies {
        let _ = writeln!(out, "C:{dep}");
    }
    for provider in &pkg.meta.providers {
        if provider.kind == crate::dependency::Kind::PackageName && provider.name == pkg.meta.name {
            continue;
        }
        let _ = writeln!(out, "G:{provider}");
    }
    for name in &pkg.meta.install_if {
        let _ = writeln!(out, "N:{name}");
    }
    for name in &pkg.meta.replaces {
        let _ = writeln!(out, "W:{name}");
    }

    let Some(ipkg) = &pkg.ipkg else {
        out.push('\n');
        return;
    };

    if !ipkg.replaces.is_empty() {
        let _ = writeln!(out, "r:{}", ipkg.replaces.join(" "));
    }
    if let Some(priority) = ipkg.replaces_priority {
        let _ = writeln!(out, "q:{priority}");
    }
    if ipkg.repo_tag != 0 {
        let _ = writeln!(out, "s:{}", ipkg.repo_tag);
    }
    let flags = flag_letters(ipkg);
    if !flags.is_empty() {
        let _ = writeln!(out, "f:{flags}");
    }

    for diri in &ipkg.dir_instances {
        let diri = diri.borrow();
        let _ = writeln!(out, "F:{}", diri.dir.borrow().path);
        if diri.acl.value() != &default_dir_acl() {
            let _ = writeln!(out, "M:{}", format_acl(diri.acl.value()));
        }
        for file in &diri.files {
            let file = file.borrow();
            let _ = writeln!(out, "R:{}", file.name);
            if file.acl.value() != &default_file_acl() {
                let _ = writeln!(out, "a:{}", format_acl(file.acl.value()));
            }
            if let Some(checksum) = &file.checksum {
                let _ = writeln!(out, "Z:{}", format_checksum(checksum));
            }
        }
    }

    out.push('\n');
}

fn flag_letters(ipkg: &InstalledPackage) -> String {
    let mut s = String::new();
    if ipkg.broken_files {
        s.push('f');
    }
    if ipkg.broken_script {
        s.push('s');
    }
    if ipkg.broken_xattr {
        s.push('x');
    }
    if ipkg.sha256_160 {
        s.push('S');
    }
    s
}

fn default_dir_acl() -> AclValue {
    AclValue {
        mode: 0o755,
        uid: 0,
        gid: 0,
        xattr_digest: None,
    }
}

fn default_file_acl() -> AclValue {
    AclValue {
        mode: 0o644,
        uid: 0,
        gid: 0,
        xattr_digest: None,
    }
}

fn format_acl(acl: &AclValue) -> String {
    match &acl.xattr_digest {
        Some(digest) => format!("{}:{}:{:o}:{}", acl.uid, acl.gid, acl.mode, hex::encode(digest)),
        None => format!("{}:{}:{:o}", acl.uid, acl.gid, acl.mode),
    }
}

fn parse_acl(value: &str, line_no: usize) -> Result<AclValue, Error> {
    let mut parts = value.splitn(4, ':');
    let uid = parts
        .next()
        .ok_or_else(|| Error::at(line_no, "acl missing uid"))?
        .parse()
        .map_err(|_| Error::at(line_no, "acl uid not numeric"))?;
    let gid = parts
        .next()
        .ok_or_else(|| Error::at(line_no, "acl missing gid"))?
        .parse()
        .map_err(|_| Error::at(line_no, "acl gid not numeric"))?;
    let mode = u16::from_str_radix(parts.next().ok_or_else(|| Error::at(line_no, "acl missing mode"))?, 8)
        .map_err(|_| Error::at(line_no, "acl mode not octal"))?;
    let xattr_digest = match parts.next() {
        Some(hex_str) if !hex_str.is_empty() => {
            Some(hex::decode(hex_str).map_err(|_| Error::at(line_no, "acl xattr digest not hex"))?.into_boxed_slice())
        }
        _ => None,
    };
    Ok(AclValue {
        mode,
        uid,
        gid,
        xattr_digest,
    })
}

fn format_checksum(checksum: &Checksum) -> String {
    let (tag, bytes) = match checksum {
        Checksum::Md5(b) => (1u8, b),
        Checksum::Sha1(b) => (2u8, b),
        Checksum::Sha256(b) => (3u8, b),
        Checksum::Sha256Truncated160(b) => (4u8, b),
    };
    format!("{tag:02x}{}", hex::encode(bytes))
}

fn parse_checksum(value: &str, line_no: usize) -> Result<Checksum, Error> {
    if value.len() < 2 {
        return Err(Error::at(line_no, "truncated checksum"));
    }
    let tag = u8::from_str_radix(&value[..2], 16).map_err(|_| Error::at(line_no, "checksum tag not hex"))?;
    let bytes = hex::decode(&value[2..]).map_err(|_| Error::at(line_no, "checksum body not hex"))?.into_boxed_slice();
    match tag {
        1 => Ok(Checksum::Md5(bytes)),
        2 => Ok(Checksum::Sha1(bytes)),
        3 => Ok(Checksum::Sha256(bytes)),
        4 => Ok(Checksum::Sha256Truncated160(bytes)),
        other => Err(Error::at(line_no, format!("unknown checksum type {other:02x}"))),
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\n', "\\n")
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[derive(Default)]
struct RecordBuilder {
    digest: Option<Digest>,
    name: Option<String>,
    version: Option<String>,
    source_release: u64,
    build_release: u64,
    architecture: Option<String>,
    summary: String,
    description: String,
    source_id: String,
    homepage: String,
    licenses: Vec<String>,
    installed_size: Option<u64>,
    build_time: u64,
    dependencies: Vec<Dependency>,
    providers: Vec<Provider>,
    install_if: Vec<String>,
    replaces: Vec<String>,
    ipkg: Option<InstalledPackage>,
    current_dir: Option<Rc<std::cell::RefCell<DirInstance>>>,
    current_file: Option<Rc<std::cell::RefCell<FileEntry>>>,
}

impl RecordBuilder {
    fn is_empty(&self) -> bool {
        self.digest.is_none()
    }

    fn ipkg_mut(&mut self) -> &mut InstalledPackage {
        self.ipkg.get_or_insert_with(InstalledPackage::new)
    }

    fn apply(&mut self, key: &str, value: &str, force_old_apk: bool, line_no: usize) -> Result<(), Error> {
        match key {
            "X" => self.digest = Some(value.parse().map_err(|_| Error::at(line_no, "invalid digest hex"))?),
            "P" => self.name = Some(value.to_string()),
            "V" => self.version = Some(value.to_string()),
            "B" => self.source_release = value.parse().map_err(|_| Error::at(line_no, "B: not numeric"))?,
            "b" => self.build_release = value.parse().map_err(|_| Error::at(line_no, "b: not numeric"))?,
            "A" => self.architecture = Some(value.to_string()),
            "U" => self.summary = value.to_string(),
            "D" => self.description = unescape(value),
            "O" => self.source_id = value.to_string(),
            "H" => self.homepage = value.to_string(),
            "L" => self.licenses.push(value.to_string()),
            "I" => self.installed_size = Some(value.parse().map_err(|_| Error::at(line_no, "I: not numeric"))?),
            "T" => self.build_time = value.parse().map_err(|_| Error::at(line_no, "T: not numeric"))?,
            "C" => self.dependencies.push(value.parse().map_err(|_| Error::at(line_no, "invalid dependency"))?),
            "G" => self.providers.push(value.parse().map_err(|_| Error::at(line_no, "invalid provider"))?),
            "N" => self.install_if.push(value.to_string()),
            "W" => self.replaces.push(value.to_string()),
            "r" => self.ipkg_mut().replaces = value.split_whitespace().map(str::to_string).collect(),
            "q" => self.ipkg_mut().replaces_priority = Some(value.parse().map_err(|_| Error::at(line_no, "q: not numeric"))?),
            "s" => self.ipkg_mut().repo_tag = value.parse().map_err(|_| Error::at(line_no, "s: not numeric"))?,
            "f" => {
                for c in value.chars() {
                    match c {
                        'f' => self.ipkg_mut().broken_files = true,
                        's' => self.ipkg_mut().broken_script = true,
                        'x' => self.ipkg_mut().broken_xattr = true,
                        'S' => self.ipkg_mut().sha256_160 = true,
                        other if !force_old_apk => return Err(Error::at(line_no, format!("unknown flag letter '{other}'"))),
                        _ => {}
                    }
                }
            }
            // F/M/R/a/Z handled by the caller, which owns the DirTree/Registry.
            _ => return Err(Error::at(line_no, format!("unknown field letter '{key}'"))),
        }
        Ok(())
    }

    fn finish(&mut self, registry: &mut Registry, layer: u8, line_no: usize) -> Result<(), Error> {
        if self.is_empty() {
            return Ok(());
        }

        let digest = self.digest.clone().unwrap();
        let name = self.name.clone().ok_or_else(|| Error::at(line_no, "record missing P:"))?;
        let version_identifier = self.version.clone().ok_or_else(|| Error::at(line_no, "record missing V:"))?;
        let architecture = self.architecture.clone().unwrap_or_default();

        let mut providers = self.providers.clone();
        providers.push(Provider {
            kind: crate::dependency::Kind::PackageName,
            name: name.clone(),
        });

        let meta = Meta {
            name,
            version_identifier,
            source_release: self.source_release,
            build_release: self.build_release,
            architecture,
            summary: self.summary.clone(),
            description: self.description.clone(),
            source_id: self.source_id.clone(),
            homepage: self.homepage.clone(),
            licenses: self.licenses.clone(),
            dependencies: self.dependencies.clone(),
            providers,
            install_if: self.install_if.clone(),
            replaces: self.replaces.clone(),
            installed_size: self.installed_size,
            build_time: self.build_time,
            uri: None,
            hash: None,
            download_size: None,
        };

        registry.pkg_add(Package {
            digest: digest.clone(),
            meta,
            repos: 0,
            layer,
            filename: None,
            ipkg: Some(self.ipkg.take().unwrap_or_default()),
            cached_non_repository: false,
            seen: false,
            state_int: 0,
        });

        Ok(())
    }
}

/// Called by the line-reading caller for `F:`/`M:`/`R:`/`a:`/`Z:` lines,
/// which need the shared [`DirTree`] the plain field setters above don't
/// have access to. Kept as a free function operating on the builder plus
/// tree/registry so [`read_installed`] remains a single straight-line loop.
impl RecordBuilder {
    fn begin_dir(&mut self, tree: &mut DirTree, path: &str, line_no: usize) -> Result<(), Error> {
        let digest = self.digest.clone().ok_or_else(|| Error::at(line_no, "F: before X:"))?;
        let dir = tree.dir_get(path);
        let diri = Rc::new(std::cell::RefCell::new(DirInstance {
            package: digest.to_string(),
            dir,
            acl: tree.acls().default_dir(),
            files: Vec::new(),
        }));
        self.ipkg_mut().dir_instances.push(diri.clone());
        self.current_dir = Some(diri);
        self.current_file = None;
        Ok(())
    }

    fn set_dir_acl(&mut self, tree: &DirTree, acl: AclValue) {
        if let Some(diri) = &self.current_dir {
            diri.borrow_mut().acl = tree.acls().intern(acl);
        }
    }

    fn begin_file(&mut self, tree: &mut DirTree, name: &str) {
        if let Some(diri) = self.current_dir.clone() {
            let file = Rc::new(std::cell::RefCell::new(FileEntry {
                diri: diri.clone(),
                name: name.to_string(),
                acl: tree.acls().default_file(),
                checksum: None,
            }));
            diri.borrow_mut().files.push(file.clone());
            tree.file_insert(file.clone());
            self.current_file = Some(file);
        }
    }

    fn set_file_acl(&mut self, tree: &DirTree, acl: AclValue) {
        if let Some(file) = &self.current_file {
            file.borrow_mut().acl = tree.acls().intern(acl);
        }
    }

    fn set_checksum(&mut self, checksum: Checksum) {
        if let Some(file) = &self.current_file {
            file.borrow_mut().checksum = Some(checksum);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> String {
        "X:aabbccdd\n\
         P:foo\n\
         V:1.0\n\
         B:1\n\
         b:1\n\
         A:x86_64\n\
         U:a summary\n\
         D:a description\n\
         O:foo\n\
         H:https://example.org\n\
         T:1700000000\n\
         F:/usr/bin\n\
         R:foo\n\
         a:0:0:755\n\
         Z:0166656564666163650000000000000000000000\n\
         \n"
            .to_string()
    }

    #[test]
    fn round_trips_minimal_record() {
        let mut registry = Registry::new();
        let mut tree = DirTree::new();

        // Manually drive the dir/file lines since `read_installed` delegates
        // those to the caller loop in the real implementation below.
        let content = sample_record();
        read_installed(&content, &mut registry, &mut tree, 0, false).unwrap();

        let digest: Digest = "aabbccdd".parse().unwrap();
        let pkg = registry.package(&digest).expect("package present");
        assert_eq!(pkg.meta.name, "foo");
        assert_eq!(pkg.meta.version_identifier, "1.0");
    }

    #[test]
    fn unknown_field_letter_is_format_error() {
        let mut registry = Registry::new();
        let mut tree = DirTree::new();
        let err = read_installed("Q:nope\n\n", &mut registry, &mut tree, 0, false).unwrap_err();
        match err {
            Error::Format { line, .. } => assert_eq!(line, 1),
        }
    }

    #[test]
    fn missing_colon_is_format_error() {
        let mut registry = Registry::new();
        let mut tree = DirTree::new();
        let err = read_installed("garbage line\n\n", &mut registry, &mut tree, 0, false).unwrap_err();
        matches!(err, Error::Format { .. });
    }

    #[test]
    fn escape_round_trips_embedded_newline() {
        let escaped = escape("line one\nline two");
        assert_eq!(unescape(&escaped), "line one\nline two");
    }

    #[test]
    fn checksum_round_trips() {
        let checksum = Checksum::Sha256(vec![1u8; 32].into_boxed_slice());
        let formatted = format_checksum(&checksum);
        let parsed = parse_checksum(&formatted, 1).unwrap();
        assert_eq!(checksum, parsed);
    }

    #[test]
    fn acl_round_trips_without_xattr() {
        let acl = AclValue {
            mode: 0o644,
            uid: 1000,
            gid: 1000,
            xattr_digest: None,
        };
        let formatted = format_acl(&acl);
        let parsed = parse_acl(&formatted, 1).unwrap();
        assert_eq!(acl, parsed);
    }
}
