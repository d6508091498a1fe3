//! Builders for synthetic nodes, trees and volume images.

use hfs_types::{
    HeaderRecord, LOGICAL_BLOCK_SIZE, MDB_OFFSET, MasterDirectoryBlock, NODE_SIZE,
    ExtentDescriptor, NodeDescriptor, catalog_record_type, file_flags, finder_flags, node_kind,
};

/// Extents as `(start_block, block_count)` pairs.
pub type Extents = [(u16, u16); 3];

pub const NO_EXTENTS: Extents = [(0, 0); 3];

/// Allocation block size of [`volume_image`].
pub const BLOCK_SIZE: usize = 512;

/// Logical block at which allocation block 0 of [`volume_image`] begins.
pub const ALLOCATION_START: u16 = 4;

/// First allocation block tests may use for file contents. Trees are placed
/// below it.
pub const DATA_AREA: u16 = 64;

fn put_offset(node: &mut [u8], i: usize, offset: usize) {
    let pos = NODE_SIZE - 2 * (i + 1);
    node[pos..pos + 2].copy_from_slice(&(offset as u16).to_be_bytes());
}

/// A node holding `records` back to back after the descriptor.
pub fn node(kind: u8, height: u8, forward_link: u32, records: &[Vec<u8>]) -> Vec<u8> {
    let mut node = vec![0u8; NODE_SIZE];
    node[0..4].copy_from_slice(&forward_link.to_be_bytes());
    node[8] = kind;
    node[9] = height;
    node[10..12].copy_from_slice(&(records.len() as u16).to_be_bytes());

    let table_start = NODE_SIZE - 2 * (records.len() + 1);
    let mut offset = NodeDescriptor::SIZE;
    for (i, record) in records.iter().enumerate() {
        assert!(offset + record.len() <= table_start, "records overflow the node");
        put_offset(&mut node, i, offset);
        node[offset..offset + record.len()].copy_from_slice(record);
        offset += record.len();
    }
    put_offset(&mut node, records.len(), offset);

    node
}

/// A complete tree file: a header node followed by `nodes`, numbered from 1.
pub fn tree(depth: u16, root: u32, first_leaf: u32, last_leaf: u32, nodes: Vec<Vec<u8>>) -> Vec<u8> {
    let total_nodes = nodes.len() as u32 + 1;
    let leaf_records: u32 = nodes
        .iter()
        .filter(|node| node[8] == node_kind::LEAF)
        .map(|node| u16::from_be_bytes([node[10], node[11]]) as u32)
        .sum();

    let mut header = vec![0u8; HeaderRecord::SIZE];
    header[0..2].copy_from_slice(&depth.to_be_bytes());
    header[2..6].copy_from_slice(&root.to_be_bytes());
    header[6..10].copy_from_slice(&leaf_records.to_be_bytes());
    header[10..14].copy_from_slice(&first_leaf.to_be_bytes());
    header[14..18].copy_from_slice(&last_leaf.to_be_bytes());
    header[18..20].copy_from_slice(&(NODE_SIZE as u16).to_be_bytes());
    header[20..22].copy_from_slice(&37u16.to_be_bytes());
    header[22..26].copy_from_slice(&total_nodes.to_be_bytes());

    let mut map = vec![0u8; NODE_SIZE - NodeDescriptor::SIZE - HeaderRecord::SIZE - 128 - 8];
    for i in 0..total_nodes as usize {
        map[i / 8] |= 0x80 >> (i % 8);
    }

    let mut data = node(node_kind::HEADER, 0, 0, &[header, vec![0; 128], map]);
    nodes.into_iter().for_each(|node| data.extend(node));
    data
}

/// A catalog key padded so the data after it starts on an even offset.
pub fn catalog_key(parent: u32, name: &str) -> Vec<u8> {
    let name = name.as_bytes();
    let mut key = vec![(6 + name.len()) as u8, 0];
    key.extend(parent.to_be_bytes());
    key.push(name.len() as u8);
    key.extend(name);
    if key.len() % 2 != 0 {
        key.push(0);
    }
    key
}

pub fn catalog_index(parent: u32, name: &str, child: u32) -> Vec<u8> {
    let mut record = catalog_key(parent, name);
    record.extend(child.to_be_bytes());
    record
}

/// Index record with the fixed 37-byte key written by the Mac OS.
pub fn catalog_index_padded(parent: u32, name: &str, child: u32) -> Vec<u8> {
    let mut record = vec![0u8; 38];
    record[0] = 37;
    record[2..6].copy_from_slice(&parent.to_be_bytes());
    record[6] = name.len() as u8;
    record[7..7 + name.len()].copy_from_slice(name.as_bytes());
    record.extend(child.to_be_bytes());
    record
}

pub fn directory(parent: u32, name: &str, id: u32, valence: u16) -> Vec<u8> {
    let mut payload = vec![0u8; 70];
    payload[0] = catalog_record_type::DIRECTORY;
    payload[4..6].copy_from_slice(&valence.to_be_bytes());
    payload[6..10].copy_from_slice(&id.to_be_bytes());
    payload[10..14].copy_from_slice(&0xA000_0000u32.to_be_bytes());
    payload[30..32].copy_from_slice(&finder_flags::HAS_BEEN_INITED.to_be_bytes());

    let mut record = catalog_key(parent, name);
    record.extend(payload);
    record
}

fn put_extents(buf: &mut [u8], extents: &Extents) {
    for (slot, (start, count)) in buf.chunks_exact_mut(ExtentDescriptor::SIZE).zip(extents) {
        slot[0..2].copy_from_slice(&start.to_be_bytes());
        slot[2..4].copy_from_slice(&count.to_be_bytes());
    }
}

/// A `TEXT`/`ttxt` file record with both forks.
pub fn file(
    parent: u32,
    name: &str,
    id: u32,
    data: (u32, Extents),
    resource: (u32, Extents),
) -> Vec<u8> {
    let physical = |extents: &Extents| {
        extents.iter().map(|&(_, count)| count as u32).sum::<u32>() * BLOCK_SIZE as u32
    };

    let mut payload = vec![0u8; 102];
    payload[0] = catalog_record_type::FILE;
    payload[2] = file_flags::USED | file_flags::THREAD_EXISTS;
    payload[4..8].copy_from_slice(b"TEXT");
    payload[8..12].copy_from_slice(b"ttxt");
    payload[20..24].copy_from_slice(&id.to_be_bytes());
    payload[24..26].copy_from_slice(&data.1[0].0.to_be_bytes());
    payload[26..30].copy_from_slice(&data.0.to_be_bytes());
    payload[30..34].copy_from_slice(&physical(&data.1).to_be_bytes());
    payload[34..36].copy_from_slice(&resource.1[0].0.to_be_bytes());
    payload[36..40].copy_from_slice(&resource.0.to_be_bytes());
    payload[40..44].copy_from_slice(&physical(&resource.1).to_be_bytes());
    put_extents(&mut payload[74..86], &data.1);
    put_extents(&mut payload[86..98], &resource.1);

    let mut record = catalog_key(parent, name);
    record.extend(payload);
    record
}

/// A thread record for `id`, pointing at `parent` and `name`.
pub fn thread(record_type: u8, id: u32, parent: u32, name: &str) -> Vec<u8> {
    let mut payload = vec![0u8; 46];
    payload[0] = record_type;
    payload[10..14].copy_from_slice(&parent.to_be_bytes());
    payload[14] = name.len() as u8;
    payload[15..15 + name.len()].copy_from_slice(name.as_bytes());

    let mut record = catalog_key(id, "");
    record.extend(payload);
    record
}

pub fn directory_thread(id: u32, parent: u32, name: &str) -> Vec<u8> {
    thread(catalog_record_type::DIRECTORY_THREAD, id, parent, name)
}

pub fn file_thread(id: u32, parent: u32, name: &str) -> Vec<u8> {
    thread(catalog_record_type::FILE_THREAD, id, parent, name)
}

pub fn overflow_key(fork: u8, file_id: u32, start: u16) -> Vec<u8> {
    let mut key = vec![7, fork];
    key.extend(file_id.to_be_bytes());
    key.extend(start.to_be_bytes());
    key
}

pub fn overflow_index(fork: u8, file_id: u32, start: u16, child: u32) -> Vec<u8> {
    let mut record = overflow_key(fork, file_id, start);
    record.extend(child.to_be_bytes());
    record
}

pub fn overflow_leaf(fork: u8, file_id: u32, start: u16, extents: Extents) -> Vec<u8> {
    let mut record = overflow_key(fork, file_id, start);
    let mut buf = [0u8; 12];
    put_extents(&mut buf, &extents);
    record.extend(buf);
    record
}

/// An overflow tree with no records.
pub fn empty_tree() -> Vec<u8> {
    tree(0, 0, 0, 0, vec![])
}

/// The sample catalog used across the tests:
///
/// ```text
/// Sample (2)
///   Alpha (20)
///     Delta (23)
///     Gamma (22)  data fork of 700 bytes at DATA_AREA, resource fork of 5 bytes
///   Beta (21)     empty
/// ```
pub fn sample_catalog() -> Vec<u8> {
    let gamma_data = (700, [(DATA_AREA, 2), (0, 0), (0, 0)]);
    let gamma_resource = (5, [(DATA_AREA + 2, 1), (0, 0), (0, 0)]);

    let index = node(
        node_kind::INDEX,
        2,
        0,
        &[
            catalog_index_padded(1, "Sample", 2),
            catalog_index_padded(20, "", 3),
            catalog_index_padded(21, "", 4),
        ],
    );
    let first = node(
        node_kind::LEAF,
        1,
        3,
        &[
            directory(1, "Sample", 2, 2),
            directory_thread(2, 1, "Sample"),
            directory(2, "Alpha", 20, 2),
            file(2, "Beta", 21, (0, NO_EXTENTS), (0, NO_EXTENTS)),
        ],
    );
    let second = node(
        node_kind::LEAF,
        1,
        4,
        &[
            directory_thread(20, 2, "Alpha"),
            directory(20, "Delta", 23, 0),
            file(20, "Gamma", 22, gamma_data, gamma_resource),
        ],
    );
    let third = node(
        node_kind::LEAF,
        1,
        0,
        &[
            file_thread(21, 2, "Beta"),
            file_thread(22, 20, "Gamma"),
            directory_thread(23, 20, "Delta"),
        ],
    );

    tree(2, 1, 2, 4, vec![index, first, second, third])
}

/// Contents of Gamma's data fork in [`sample_image`].
pub fn gamma_data() -> Vec<u8> {
    (0..700u32).map(|i| (i % 251) as u8).collect()
}

/// A volume named "Sample" holding [`sample_catalog`] and Gamma's forks.
pub fn sample_image() -> Vec<u8> {
    let mut data_blocks = gamma_data();
    // Padding past the logical end of the fork.
    data_blocks.resize(2 * BLOCK_SIZE, 0xEE);

    volume_image(
        "Sample",
        &empty_tree(),
        &sample_catalog(),
        &[
            (DATA_AREA, data_blocks.as_slice()),
            (DATA_AREA + 2, b"Hello".as_slice()),
        ],
    )
}

/// An HFS volume with the given trees and allocation block contents. The
/// overflow tree starts at allocation block 0 and the catalog follows it.
pub fn volume_image(name: &str, overflow: &[u8], catalog: &[u8], contents: &[(u16, &[u8])]) -> Vec<u8> {
    let overflow_blocks = overflow.len().div_ceil(BLOCK_SIZE) as u16;
    let catalog_blocks = catalog.len().div_ceil(BLOCK_SIZE) as u16;
    assert!(overflow_blocks + catalog_blocks <= DATA_AREA, "trees overflow into the data area");

    let mut mdb = vec![0u8; MasterDirectoryBlock::SIZE];
    mdb[0..2].copy_from_slice(b"BD");
    mdb[18..20].copy_from_slice(&1024u16.to_be_bytes());
    mdb[20..24].copy_from_slice(&(BLOCK_SIZE as u32).to_be_bytes());
    mdb[28..30].copy_from_slice(&ALLOCATION_START.to_be_bytes());
    mdb[30..34].copy_from_slice(&64u32.to_be_bytes());
    mdb[36] = name.len() as u8;
    mdb[37..37 + name.len()].copy_from_slice(name.as_bytes());
    mdb[130..134].copy_from_slice(&(overflow.len() as u32).to_be_bytes());
    put_extents(&mut mdb[134..146], &[(0, overflow_blocks), (0, 0), (0, 0)]);
    mdb[146..150].copy_from_slice(&(catalog.len() as u32).to_be_bytes());
    put_extents(&mut mdb[150..162], &[(overflow_blocks, catalog_blocks), (0, 0), (0, 0)]);

    let base = ALLOCATION_START as usize * LOGICAL_BLOCK_SIZE;
    let mut image = vec![0u8; base + DATA_AREA as usize * BLOCK_SIZE];
    let mdb_offset = MDB_OFFSET as usize;
    image[mdb_offset..mdb_offset + mdb.len()].copy_from_slice(&mdb);

    let mut place = |block: u16, bytes: &[u8]| {
        let start = base + block as usize * BLOCK_SIZE;
        let end = start + bytes.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        if image.len() < end {
            image.resize(end, 0);
        }
        image[start..start + bytes.len()].copy_from_slice(bytes);
    };
    place(0, overflow);
    place(overflow_blocks, catalog);
    contents.iter().for_each(|&(block, bytes)| place(block, bytes));

    image
}
