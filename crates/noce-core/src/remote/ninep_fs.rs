//! 9P backend over the `ninep` client crate.
//!
//! The upstream client only exposes whole-file reads and whole-directory
//! listings, so a file is fetched in full before it is streamed out and a
//! listing is returned as a single batch.

use std::io::{self, Cursor, Read};

use ::ninep::client::TcpClient;

use super::{join, DirEntry, DirStream, Mount, RemoteFs};

/// Plan 9 directory bit in the mode word.
const DMDIR: u32 = 0x8000_0000;

#[derive(Debug, Clone)]
pub struct NinepMount {
    address: String,
    user: String,
}

impl NinepMount {
    /// Mount as the invoking user (`$USER`, else `none`).
    pub fn new(address: impl Into<String>) -> Self {
        let user = std::env::var("USER").unwrap_or_else(|_| "none".to_string());
        Self {
            address: address.into(),
            user,
        }
    }
}

impl Mount for NinepMount {
    type Conn = NinepFs;

    fn mount(&self) -> io::Result<NinepFs> {
        let client = TcpClient::new_tcp(self.user.clone(), &self.address, "")?;
        Ok(NinepFs { client })
    }
}

pub struct NinepFs {
    client: TcpClient,
}

impl RemoteFs for NinepFs {
    fn open(&mut self, path: &str) -> io::Result<Box<dyn Read + Send + '_>> {
        let data = self.client.read(path.to_string())?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn open_dir(&mut self, path: &str) -> io::Result<Box<dyn DirStream + '_>> {
        let stats = self.client.read_dir(path.to_string())?;
        let entries = stats
            .into_iter()
            .map(|stat| {
                let name = stat.fm.name.clone();
                let is_dir = stat.fm.ty == ::ninep::fs::FileType::Directory;
                let mode = stat.perms.bits() | if is_dir { DMDIR } else { 0 };
                DirEntry {
                    path: join(path, &name),
                    name,
                    is_dir,
                    mode,
                }
            })
            .collect();
        Ok(Box::new(SingleBatch {
            entries: Some(entries),
        }))
    }
}

struct SingleBatch {
    entries: Option<Vec<DirEntry>>,
}

impl DirStream for SingleBatch {
    fn next_batch(&mut self) -> io::Result<Vec<DirEntry>> {
        Ok(self.entries.take().unwrap_or_default())
    }
}
