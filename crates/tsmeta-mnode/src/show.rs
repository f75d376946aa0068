//! Administrative listing of management nodes
//!
//! A listing is produced in two steps: [`NodeDirectory::show_meta`] checks the
//! caller and describes the columns, then [`NodeDirectory::retrieve`] fills a
//! caller buffer in column-major order, a batch of rows per call, until it
//! returns 0.
//!
//! Within a batch of `rows` rows, the cell of column `c` for row `r` starts at
//! `offset[c] * rows + bytes[c] * r`.

use crate::directory::{MnodeActions, NodeDirectory};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;
use tsmeta_common::{Error, Result, role_label};
use tsmeta_sdb::Cursor;

/// Cell encoding of a listing column
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    /// Little-endian `i16`
    SmallInt,
    /// NUL padded text
    Binary,
    /// Little-endian `i64` milliseconds since the Unix epoch
    Timestamp,
}

/// One listing column
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: &'static str,
    pub col_type: ColumnType,
    /// Cell width in bytes
    pub bytes: usize,
}

/// Columns of the management-node listing
pub const MNODE_COLUMNS: [ColumnSchema; 5] = [
    ColumnSchema {
        name: "id",
        col_type: ColumnType::SmallInt,
        bytes: 2,
    },
    ColumnSchema {
        name: "private ip",
        col_type: ColumnType::Binary,
        bytes: 16,
    },
    ColumnSchema {
        name: "public ip",
        col_type: ColumnType::Binary,
        bytes: 16,
    },
    ColumnSchema {
        name: "create time",
        col_type: ColumnType::Timestamp,
        bytes: 8,
    },
    ColumnSchema {
        name: "role",
        col_type: ColumnType::Binary,
        bytes: 10,
    },
];

/// Authenticated user behind a connection
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub name: String,
    /// Owning account
    pub account: String,
}

/// Client connection issuing a listing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Connection {
    pub id: u64,
}

/// Resolves the user behind a connection
pub trait UserLookup: Send + Sync {
    fn current_user(&self, conn: &Connection) -> Option<User>;
}

/// In-process connection to user mapping
#[derive(Debug, Default)]
pub struct MemoryUsers {
    sessions: RwLock<HashMap<Connection, User>>,
}

impl MemoryUsers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `conn` to `user`
    pub fn login(&self, conn: Connection, user: User) {
        self.sessions.write().insert(conn, user);
    }

    /// Drop the binding of `conn`
    pub fn logout(&self, conn: &Connection) {
        self.sessions.write().remove(conn);
    }
}

impl UserLookup for MemoryUsers {
    fn current_user(&self, conn: &Connection) -> Option<User> {
        self.sessions.read().get(conn).cloned()
    }
}

/// State of one listing in progress
#[derive(Debug)]
pub struct ShowObj {
    pub columns: Vec<ColumnSchema>,
    /// Byte offset of each column within a row
    pub offsets: Vec<usize>,
    /// Sum of all column widths
    pub row_size: usize,
    /// Number of rows when the listing started
    pub num_rows: usize,
    /// Rows written so far
    pub reads: usize,
    cursor: Cursor,
}

impl ShowObj {
    fn new(columns: &[ColumnSchema], num_rows: usize) -> Self {
        let mut offsets = Vec::with_capacity(columns.len());
        let mut row_size = 0;
        for column in columns {
            offsets.push(row_size);
            row_size += column.bytes;
        }

        Self {
            columns: columns.to_vec(),
            offsets,
            row_size,
            num_rows,
            reads: 0,
            cursor: Cursor::default(),
        }
    }

    fn cell_range(&self, rows: usize, col: usize, row: usize) -> std::ops::Range<usize> {
        let start = self.offsets[col] * rows + self.columns[col].bytes * row;
        start..start + self.columns[col].bytes
    }

    /// Text cell of a batch of `rows` rows
    pub fn text_at<'a>(&self, data: &'a [u8], rows: usize, col: usize, row: usize) -> &'a str {
        let cell = &data[self.cell_range(rows, col, row)];
        let end = cell.iter().position(|&b| b == 0).unwrap_or(cell.len());
        std::str::from_utf8(&cell[..end]).unwrap_or_default()
    }

    /// Small integer cell of a batch of `rows` rows
    pub fn i16_at(&self, data: &[u8], rows: usize, col: usize, row: usize) -> i16 {
        let cell = &data[self.cell_range(rows, col, row)];
        i16::from_le_bytes([cell[0], cell[1]])
    }

    /// Timestamp cell of a batch of `rows` rows
    pub fn i64_at(&self, data: &[u8], rows: usize, col: usize, row: usize) -> i64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&data[self.cell_range(rows, col, row)][..8]);
        i64::from_le_bytes(buf)
    }

    fn put(&self, data: &mut [u8], rows: usize, col: usize, row: usize, value: &[u8]) {
        let cell = &mut data[self.cell_range(rows, col, row)];
        let len = value.len().min(cell.len());
        cell[..len].copy_from_slice(&value[..len]);
        cell[len..].fill(0);
    }

    fn put_text(&self, data: &mut [u8], rows: usize, col: usize, row: usize, text: &str) {
        // Keep room for the terminating NUL
        let max = self.columns[col].bytes - 1;
        let bytes = text.as_bytes();
        self.put(data, rows, col, row, &bytes[..bytes.len().min(max)]);
    }
}

impl NodeDirectory {
    /// Start a listing for the user behind `conn`.
    ///
    /// Only the configured administrative account may list management nodes.
    pub fn show_meta(&self, users: &dyn UserLookup, conn: &Connection) -> Result<ShowObj> {
        let user = users.current_user(conn).ok_or(Error::UserNotFound)?;
        if user.account != self.config().admin_user {
            debug!("User {} may not list management nodes", user.name);
            return Err(Error::PermissionDenied);
        }

        Ok(ShowObj::new(&MNODE_COLUMNS, self.count()))
    }

    /// Fill `data` with up to `rows` rows, returning how many were written.
    ///
    /// Returns 0 once every entry has been listed. Entries whose host is gone
    /// are listed with empty addresses.
    pub fn retrieve(&self, show: &mut ShowObj, data: &mut [u8], rows: usize) -> Result<usize> {
        let needed = show.row_size * rows;
        if data.len() < needed {
            return Err(Error::invalid_argument(format!(
                "listing buffer holds {} bytes, {} rows need {}",
                data.len(),
                rows,
                needed
            )));
        }

        let mut written = 0;
        while written < rows {
            let Some(handle) = self.table().next_row(&mut show.cursor) else {
                break;
            };
            write_row(show, data, rows, written, &handle);
            written += 1;
        }

        show.reads += written;
        Ok(written)
    }
}

fn write_row(
    show: &ShowObj,
    data: &mut [u8],
    rows: usize,
    row: usize,
    handle: &tsmeta_sdb::RowHandle<MnodeActions>,
) {
    let entry = handle.read();
    let host = entry.host.upgrade();

    let id = i16::try_from(entry.node_id.get()).unwrap_or(i16::MAX);
    show.put(data, rows, 0, row, &id.to_le_bytes());

    let private_ip = host.as_ref().map(|h| h.private_ip.to_string()).unwrap_or_default();
    show.put_text(data, rows, 1, row, &private_ip);

    let public_ip = host.as_ref().map(|h| h.public_ip.to_string()).unwrap_or_default();
    show.put_text(data, rows, 2, row, &public_ip);

    show.put(data, rows, 3, row, &entry.created_time.to_le_bytes());
    show.put_text(data, rows, 4, row, role_label(entry.role.as_raw()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{directory, hosts_with};
    use std::collections::HashSet;
    use tsmeta_common::{NodeId, SyncRole};
    use tsmeta_sdb::Sdb;

    fn users() -> MemoryUsers {
        let users = MemoryUsers::new();
        users.login(
            Connection { id: 1 },
            User {
                name: "root".into(),
                account: "root".into(),
            },
        );
        users.login(
            Connection { id: 2 },
            User {
                name: "reader".into(),
                account: "analytics".into(),
            },
        );
        users
    }

    #[test]
    fn test_meta_layout() {
        let sdb = Sdb::in_memory();
        let hosts = hosts_with(&[1]);
        let dir = directory(&sdb, &hosts);
        dir.admit(NodeId::new(1)).unwrap();

        let show = dir.show_meta(&users(), &Connection { id: 1 }).unwrap();
        let names: Vec<&str> = show.columns.iter().map(|c| c.name).collect();
        assert_eq!(
            names,
            ["id", "private ip", "public ip", "create time", "role"]
        );
        assert_eq!(show.offsets, [0, 2, 18, 34, 42]);
        assert_eq!(show.row_size, 52);
        assert_eq!(show.num_rows, 1);
    }

    #[test]
    fn test_non_admin_rejected() {
        let sdb = Sdb::in_memory();
        let hosts = hosts_with(&[1]);
        let dir = directory(&sdb, &hosts);
        dir.admit(NodeId::new(1)).unwrap();

        let err = dir.show_meta(&users(), &Connection { id: 2 }).unwrap_err();
        assert!(matches!(err, Error::PermissionDenied));

        let err = dir.show_meta(&users(), &Connection { id: 9 }).unwrap_err();
        assert!(matches!(err, Error::UserNotFound));
    }

    #[test]
    fn test_retrieve_in_batches() {
        let sdb = Sdb::in_memory();
        let hosts = hosts_with(&[1, 2, 3]);
        let dir = directory(&sdb, &hosts);
        for id in 1..=3 {
            dir.admit(NodeId::new(id)).unwrap();
        }
        dir.set_role(NodeId::new(2), SyncRole::Master).unwrap();

        let mut show = dir.show_meta(&users(), &Connection { id: 1 }).unwrap();
        let rows = 2;
        let mut data = vec![0u8; show.row_size * rows];
        let mut seen = HashSet::new();

        let mut batches = vec![];
        loop {
            let n = dir.retrieve(&mut show, &mut data, rows).unwrap();
            if n == 0 {
                break;
            }
            batches.push(n);

            for row in 0..n {
                let id = show.i16_at(&data, rows, 0, row);
                let private_ip = show.text_at(&data, rows, 1, row);
                let public_ip = show.text_at(&data, rows, 2, row);
                let created = show.i64_at(&data, rows, 3, row);
                let role = show.text_at(&data, rows, 4, row);

                assert_eq!(private_ip, format!("10.0.0.{id}"));
                assert_eq!(public_ip, format!("192.0.2.{id}"));
                let expected = dir.get(NodeId::new(i32::from(id))).unwrap();
                assert_eq!(created, expected.read().created_time);
                assert_eq!(role, if id == 2 { "master" } else { "offline" });
                seen.insert(id);
            }
        }

        assert_eq!(batches, [2, 1]);
        assert_eq!(seen, HashSet::from([1, 2, 3]));
        assert_eq!(show.reads, 3);
    }

    #[test]
    fn test_retrieve_buffer_too_small() {
        let sdb = Sdb::in_memory();
        let hosts = hosts_with(&[1]);
        let dir = directory(&sdb, &hosts);

        let mut show = dir.show_meta(&users(), &Connection { id: 1 }).unwrap();
        let mut data = vec![0u8; show.row_size];
        let err = dir.retrieve(&mut show, &mut data, 4).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_dangling_host_listed_blank() {
        let sdb = Sdb::in_memory();
        let hosts = hosts_with(&[1]);
        let dir = directory(&sdb, &hosts);
        dir.admit(NodeId::new(1)).unwrap();
        hosts.remove(NodeId::new(1));

        let mut show = dir.show_meta(&users(), &Connection { id: 1 }).unwrap();
        let mut data = vec![0xffu8; show.row_size];
        assert_eq!(dir.retrieve(&mut show, &mut data, 1).unwrap(), 1);
        assert_eq!(show.i16_at(&data, 1, 0, 0), 1);
        assert_eq!(show.text_at(&data, 1, 1, 0), "");
        assert_eq!(show.text_at(&data, 1, 4, 0), "offline");
    }
}
