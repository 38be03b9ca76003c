//! Filesystem services: node lookup with reference counting, and
//! descriptor teardown.

/// What a path resolved to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FsNodeKind {
    Directory,
    Regular,
}

/// A referenced filesystem node. The caller owns one reference and
/// must release it with `node_deref`.
#[derive(Clone, Copy, Debug)]
pub struct FsNodeInfo {
    pub handle: u64,
    pub kind: FsNodeKind,
}

crate::define_service! {
    filesystem => FilesystemServices {
        /// Resolve an absolute, normalized path to a node, taking a
        /// reference on it.
        find_and_ref(path: &str) -> Option<FsNodeInfo>;
        /// Release a reference taken by `find_and_ref`.
        node_deref(handle: u64);
        /// Close an open descriptor from a task's handle table.
        handle_close(handle: u64);
    }
}
