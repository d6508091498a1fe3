use classic_hfs::{BlockStore, Directory, DirectoryEntry, Disk, Error, File, ImageReader};
use itertools::Itertools;
use sha2::{Digest, Sha256};
use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

fn main() -> Result<(), Error> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 && args.len() != 3 {
        eprintln!("usage: read /path/to/file.img [/path/to/output/]");
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "Missing file argument").into());
    }

    let image_path = &args[1];
    let output = args.get(2).map(PathBuf::from);
    println!("Operating on {image_path}");

    let image = fs::File::options().read(true).open(image_path)?;
    let disk = Disk::open(ImageReader::new(image))?;

    for volume in disk.volumes() {
        let mdb = volume.master_directory_block();
        println!(
            "Volume {:?}: {} files, {} directories, {} byte allocation blocks",
            volume.name(),
            mdb.file_count,
            mdb.directory_count,
            volume.geometry().allocation_block_size
        );

        let Some(root) = volume.root_directory()? else {
            eprintln!("Volume {:?} has no root directory", volume.name());
            continue;
        };

        let output = output
            .as_ref()
            .map(|output| output.join(host_name(volume.name())));
        walk(&root, &mut Vec::new(), output.as_deref())?;
    }

    Ok(())
}

/// Print every entry below `directory`, extracting files when `output` is set.
fn walk<S: BlockStore>(
    directory: &Directory<'_, S>,
    path: &mut Vec<String>,
    output: Option<&Path>,
) -> Result<(), Error> {
    for entry in directory.contents()? {
        path.push(entry.name().to_string());
        println!("{}", path.iter().join(":"));

        match &entry {
            DirectoryEntry::Directory(subdirectory) => walk(subdirectory, path, output)?,
            DirectoryEntry::File(file) => {
                if let Some(output) = output {
                    extract(file, path, output)?;
                }
            }
        }

        path.pop();
    }

    Ok(())
}

/// Write a file's data fork under `output`, mirroring its path on the volume.
/// A fork that cannot be read is reported and skipped.
fn extract<S: BlockStore>(file: &File<'_, S>, path: &[String], output: &Path) -> Result<(), Error> {
    let mut host_path = output.to_path_buf();
    host_path.extend(path.iter().map(|name| host_name(name)));

    let Some(data) = readable(file.data_fork(), path) else {
        return Ok(());
    };

    if let Some(parent) = host_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let cksum = format!("{:x}", Sha256::digest(&data));

    let mut out = fs::File::options()
        .write(true)
        .create_new(true)
        .open(&host_path)?;
    out.write_all(&data)?;

    println!("Done {host_path:?} bytes={} cksum={cksum}", data.len());
    Ok(())
}

/// Fork bytes, or `None` after reporting why the fork could not be read.
fn readable(fork: Result<Vec<u8>, Error>, path: &[String]) -> Option<Vec<u8>> {
    fork.inspect_err(|err| log::warn!("Skipping {}: {err}", path.iter().join(":")))
        .ok()
}

/// HFS names may contain `/` but not `:`, so swap one for the other.
fn host_name(name: &str) -> String {
    match name {
        "." | ".." => format!("_{name}"),
        name => name.replace('/', ":"),
    }
}
