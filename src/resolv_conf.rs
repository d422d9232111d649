//! Line-level management of the system resolver file.
//!
//! The managed line `nameserver <listen ip>` is kept as the first nameserver
//! directive while the daemon runs, so the libc resolver asks us first.
//! Everything else in the file keeps its content and relative order.

use std::fs::Permissions;
use std::net::{IpAddr, Ipv4Addr};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::ResolvConfError;

pub const DEFAULT_RESOLV_CONF: &str = "/etc/resolv.conf";

/// Mode of every file we rewrite. The resolver file has to stay world readable.
const RESOLV_CONF_MODE: u32 = 0o644;

/// Where the managed line sits in a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    NoNameserver,
    OursFirst,
    OursMisplaced,
    OursAbsent,
}

/// A resolver file as an ordered list of lines.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvConfDocument {
    lines: Vec<String>,
}

fn nameserver_of(line: &str) -> Option<&str> {
    let mut tokens = line.split_whitespace();
    match tokens.next() {
        Some("nameserver") => tokens.next(),
        _ => None,
    }
}

fn is_nameserver(line: &str) -> bool {
    line.split_whitespace().next() == Some("nameserver")
}

fn is_managed(line: &str, listen_ip: Ipv4Addr) -> bool {
    let mut tokens = line.split_whitespace();
    tokens.next() == Some("nameserver")
        && tokens.next().and_then(|it| it.parse::<IpAddr>().ok()) == Some(IpAddr::V4(listen_ip))
        && tokens.next().is_none()
}

fn managed_line(listen_ip: Ipv4Addr) -> String {
    format!("nameserver {listen_ip}")
}

impl ResolvConfDocument {
    pub fn parse(content: &str) -> Self {
        Self { lines: content.lines().map(str::to_owned).collect() }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(|it| it.trim().is_empty())
    }

    /// Renders the document with one trailing newline.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    pub fn placement(&self, listen_ip: Ipv4Addr) -> Placement {
        let first_ns = self.lines.iter().position(|it| is_nameserver(it));
        let ours = self.lines.iter().position(|it| is_managed(it, listen_ip));
        match (first_ns, ours) {
            (None, _) => Placement::NoNameserver,
            (Some(_), None) => Placement::OursAbsent,
            (Some(start), Some(idx)) if start == idx => Placement::OursFirst,
            (Some(_), Some(_)) => Placement::OursMisplaced,
        }
    }

    /// Puts the managed line in front of every other nameserver line.
    ///
    /// Returns `true` if the document changed. Repeated copies of the managed
    /// line collapse into the single leading one.
    pub fn ensure(&mut self, listen_ip: Ipv4Addr) -> bool {
        if self.is_empty() {
            let before = std::mem::take(&mut self.lines);
            self.lines.push(managed_line(listen_ip));
            return before != self.lines;
        }

        let start_idx = self.lines.iter().position(|it| is_nameserver(it));

        let mut lines = Vec::with_capacity(self.lines.len() + 1);
        for (idx, line) in self.lines.iter().enumerate() {
            if Some(idx) == start_idx {
                lines.push(managed_line(listen_ip));
            }
            if is_managed(line, listen_ip) {
                continue;
            }
            lines.push(line.clone());
        }
        if start_idx.is_none() {
            lines.push(managed_line(listen_ip));
        }

        if lines == self.lines {
            return false;
        }
        self.lines = lines;
        true
    }

    /// Drops every line carrying a `search` token. Returns `true` if any went.
    pub fn remove_search_domains(&mut self) -> bool {
        let before = self.lines.len();
        self.lines.retain(|line| !line.split_whitespace().any(|t| t == "search"));
        before != self.lines.len()
    }

    /// Drops the managed line and every blank line.
    pub fn cleanup(&mut self, listen_ip: Ipv4Addr) -> bool {
        let before = self.lines.len();
        self.lines.retain(|line| !is_managed(line, listen_ip) && !line.trim().is_empty());
        before != self.lines.len()
    }

    /// Nameservers other than `listen_ip`, in file order and without repeats.
    pub fn other_nameservers(&self, listen_ip: Ipv4Addr) -> Vec<IpAddr> {
        let mut servers = Vec::new();
        for line in &self.lines {
            let Some(server) = nameserver_of(line) else {
                continue;
            };
            let server = match server.parse::<IpAddr>() {
                Ok(server) => server,
                Err(_) => {
                    warn!("ignoring unparsable nameserver {server:?}");
                    continue;
                }
            };
            if server == IpAddr::V4(listen_ip) || servers.contains(&server) {
                continue;
            }
            servers.push(server);
        }
        servers
    }
}

/// Reconciles a resolver file on disk. All writes are whole-file rewrites.
pub struct ResolvConf {
    path: PathBuf,
    remove_search_domains: bool,
}

impl ResolvConf {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), remove_search_domains: false }
    }

    pub fn with_remove_search_domains(mut self, enabled: bool) -> Self {
        self.remove_search_domains = enabled;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<ResolvConfDocument, ResolvConfError> {
        let content = std::fs::read_to_string(&self.path)
            .map_err(|source| ResolvConfError::Read { path: self.path.clone(), source })?;
        Ok(ResolvConfDocument::parse(&content))
    }

    fn write(&self, doc: &ResolvConfDocument) -> Result<(), ResolvConfError> {
        let write_err = |source| ResolvConfError::Write { path: self.path.clone(), source };
        std::fs::write(&self.path, doc.render()).map_err(write_err)?;
        std::fs::set_permissions(&self.path, Permissions::from_mode(RESOLV_CONF_MODE)).map_err(write_err)?;
        Ok(())
    }

    /// Makes `nameserver <listen_ip>` the first nameserver of the file.
    ///
    /// Returns `true` if the file was rewritten. A read error aborts before
    /// anything is written.
    pub fn ensure(&self, listen_ip: Ipv4Addr) -> Result<bool, ResolvConfError> {
        let mut doc = self.read()?;
        let placement = doc.placement(listen_ip);

        let mut changed = doc.ensure(listen_ip);
        if self.remove_search_domains {
            changed |= doc.remove_search_domains();
        }
        if !changed {
            debug!("{} already lists {listen_ip} first", self.path.display());
            return Ok(false);
        }

        self.write(&doc)?;
        info!("patched {} ({placement:?}), {listen_ip} is now the first nameserver", self.path.display());
        Ok(true)
    }

    /// Removes the managed line again. Search lines deleted earlier stay deleted.
    pub fn cleanup(&self, listen_ip: Ipv4Addr) -> Result<(), ResolvConfError> {
        let mut doc = self.read()?;
        doc.cleanup(listen_ip);
        self.write(&doc)?;
        info!("removed nameserver {listen_ip} from {}", self.path.display());
        Ok(())
    }

    pub fn other_nameservers(&self, listen_ip: Ipv4Addr) -> Result<Vec<IpAddr>, ResolvConfError> {
        Ok(self.read()?.other_nameservers(listen_ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTEN: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

    const PREDEFINED: &str = "search svc.cluster.local cluster.local\nnameserver 8.8.8.8\nnameserver 4.4.4.4\n";

    fn ensured(content: &str) -> String {
        let mut doc = ResolvConfDocument::parse(content);
        doc.ensure(LISTEN);
        doc.render()
    }

    fn write_temp(content: &str) -> (tempfile::TempDir, ResolvConf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resolv.conf");
        std::fs::write(&path, content).unwrap();
        (dir, ResolvConf::new(path))
    }

    #[test]
    fn test_insert_before_first_nameserver() {
        assert_eq!(
            ensured(PREDEFINED),
            "search svc.cluster.local cluster.local\nnameserver 10.0.0.1\nnameserver 8.8.8.8\nnameserver 4.4.4.4\n"
        );
        let doc = ResolvConfDocument::parse(PREDEFINED);
        assert_eq!(
            doc.other_nameservers(LISTEN),
            vec!["8.8.8.8".parse::<IpAddr>().unwrap(), "4.4.4.4".parse().unwrap()]
        );
    }

    #[test]
    fn test_placement_states() {
        let p = |c: &str| ResolvConfDocument::parse(c).placement(LISTEN);
        assert_eq!(p("search a\n"), Placement::NoNameserver);
        assert_eq!(p("nameserver 10.0.0.1\nnameserver 8.8.8.8\n"), Placement::OursFirst);
        assert_eq!(p("nameserver 8.8.8.8\nnameserver 10.0.0.1\n"), Placement::OursMisplaced);
        assert_eq!(p("nameserver 8.8.8.8\n"), Placement::OursAbsent);
    }

    #[test]
    fn test_empty_document() {
        assert_eq!(ensured(""), "nameserver 10.0.0.1\n");
        assert_eq!(ensured("\n\n"), "nameserver 10.0.0.1\n");
    }

    #[test]
    fn test_append_without_nameservers() {
        assert_eq!(
            ensured("# generated\nsearch local\noptions ndots:5\n"),
            "# generated\nsearch local\noptions ndots:5\nnameserver 10.0.0.1\n"
        );
    }

    #[test]
    fn test_move_misplaced_line() {
        let input = "# head\nnameserver 8.8.8.8\noptions rotate\nnameserver 10.0.0.1\nnameserver 4.4.4.4\n";
        assert_eq!(
            ensured(input),
            "# head\nnameserver 10.0.0.1\nnameserver 8.8.8.8\noptions rotate\nnameserver 4.4.4.4\n"
        );
    }

    #[test]
    fn test_already_first_is_untouched() {
        let input = "search a\nnameserver 10.0.0.1\nnameserver 8.8.8.8\n";
        let mut doc = ResolvConfDocument::parse(input);
        assert!(!doc.ensure(LISTEN));
        assert_eq!(doc.render(), input);
    }

    #[test]
    fn test_duplicates_collapse() {
        assert_eq!(
            ensured("nameserver 10.0.0.1\nnameserver 8.8.8.8\nnameserver 10.0.0.1\n"),
            "nameserver 10.0.0.1\nnameserver 8.8.8.8\n"
        );
    }

    #[test]
    fn test_similar_address_is_not_ours() {
        assert_eq!(
            ensured("nameserver 10.0.0.10\n"),
            "nameserver 10.0.0.1\nnameserver 10.0.0.10\n"
        );
    }

    #[test]
    fn test_ensure_is_idempotent_and_first_for_any_arrangement() {
        let others = ["nameserver 8.8.8.8", "nameserver 4.4.4.4", "nameserver 1.1.1.1"];
        let opaque = ["search a b", "options ndots:2", "# comment"];
        for n in 0..=others.len() {
            for pos in 0..=n {
                let mut lines: Vec<&str> = Vec::new();
                lines.extend(opaque.iter().take(1));
                lines.extend(others.iter().take(n));
                let ours = "nameserver 10.0.0.1";
                lines.insert(1 + pos.min(n), ours);
                lines.extend(opaque.iter().skip(1));
                let input = lines.join("\n") + "\n";

                let mut doc = ResolvConfDocument::parse(&input);
                doc.ensure(LISTEN);
                let first_ns = doc.lines().iter().find(|l| is_nameserver(l)).unwrap();
                assert_eq!(first_ns, "nameserver 10.0.0.1", "input: {input:?}");

                let kept = doc.lines().iter().filter(|l| !is_managed(l, LISTEN)).cloned().collect::<Vec<_>>();
                let expected = lines.iter().filter(|l| **l != ours).map(|l| l.to_string()).collect::<Vec<_>>();
                assert_eq!(kept, expected);

                let once = doc.render();
                assert!(!doc.ensure(LISTEN));
                assert_eq!(doc.render(), once);
            }
        }
    }

    #[test]
    fn test_remove_consecutive_search_lines() {
        let mut doc = ResolvConfDocument::parse("search a\nsearch b\nnameserver 8.8.8.8\nsearch c\n");
        assert!(doc.remove_search_domains());
        assert_eq!(doc.render(), "nameserver 8.8.8.8\n");
        assert!(!doc.remove_search_domains());
    }

    #[test]
    fn test_cleanup_after_ensure_round_trip() {
        let input = "search svc.cluster.local\nnameserver 8.8.8.8\noptions ndots:5\nnameserver 4.4.4.4\n";
        let mut doc = ResolvConfDocument::parse(input);
        doc.ensure(LISTEN);
        assert!(doc.cleanup(LISTEN));
        assert_eq!(doc.render(), input);
    }

    #[test]
    fn test_cleanup_drops_blank_lines() {
        let mut doc = ResolvConfDocument::parse("\nnameserver 10.0.0.1\n\nnameserver 8.8.8.8\n");
        doc.cleanup(LISTEN);
        assert_eq!(doc.render(), "nameserver 8.8.8.8\n");
    }

    #[test]
    fn test_other_nameservers_skip_garbage_and_repeats() {
        let doc = ResolvConfDocument::parse(
            "nameserver 10.0.0.1\nnameserver fd00::1\nnameserver bogus\nnameserver 8.8.8.8\nnameserver 8.8.8.8\n",
        );
        assert_eq!(
            doc.other_nameservers(LISTEN),
            vec!["fd00::1".parse::<IpAddr>().unwrap(), "8.8.8.8".parse().unwrap()]
        );
    }

    #[test]
    fn test_file_ensure_twice_writes_once() {
        let (_dir, resolv) = write_temp(PREDEFINED);
        assert!(resolv.ensure(LISTEN).unwrap());
        let first = std::fs::read_to_string(resolv.path()).unwrap();
        assert!(!resolv.ensure(LISTEN).unwrap());
        assert_eq!(std::fs::read_to_string(resolv.path()).unwrap(), first);

        let mode = std::fs::metadata(resolv.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, RESOLV_CONF_MODE);
    }

    #[test]
    fn test_file_ensure_strips_search() {
        let (_dir, resolv) = write_temp(PREDEFINED);
        let resolv = resolv.with_remove_search_domains(true);
        assert!(resolv.ensure(LISTEN).unwrap());
        assert_eq!(
            std::fs::read_to_string(resolv.path()).unwrap(),
            "nameserver 10.0.0.1\nnameserver 8.8.8.8\nnameserver 4.4.4.4\n"
        );

        resolv.cleanup(LISTEN).unwrap();
        assert_eq!(
            std::fs::read_to_string(resolv.path()).unwrap(),
            "nameserver 8.8.8.8\nnameserver 4.4.4.4\n"
        );
    }

    #[test]
    fn test_unreadable_file_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.conf");
        let resolv = ResolvConf::new(&path);
        assert!(matches!(resolv.ensure(LISTEN), Err(ResolvConfError::Read { .. })));
        assert!(!path.exists());
    }
}
