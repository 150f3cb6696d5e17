//! Object tree operations over the memory image.
//!
//! Objects are never cached: every operation re-reads the table so that
//! memory writes from opcodes are always visible. v1-3 records are 9 bytes
//! with byte-wide links; v4+ records are 14 bytes with word-wide links.

use crate::text::{decode_string, Abbreviations};
use crate::vm::VM;
use log::debug;

impl VM {
    fn max_objects(&self) -> u16 {
        if self.version() <= 3 {
            255
        } else {
            65535
        }
    }

    fn object_entry_size(&self) -> u32 {
        if self.version() <= 3 {
            9
        } else {
            14
        }
    }

    /// Number of words in the property-default table before the records.
    fn default_count(&self) -> u32 {
        if self.version() <= 3 {
            31
        } else {
            63
        }
    }

    /// Byte address of object `obj`'s record.
    pub fn object_addr(&self, obj: u16) -> Result<u32, String> {
        if obj == 0 || obj > self.max_objects() {
            return Err(format!("invalid object number: {obj}"));
        }
        let base = self.game.header.object_table_addr as u32 + self.default_count() * 2;
        Ok(base + (obj as u32 - 1) * self.object_entry_size())
    }

    /// Test attribute `attr` of object `obj`. Attribute bits run from the
    /// high bit of each byte: attribute a is bit 7 - (a % 8) of byte a / 8.
    pub fn test_attribute(&self, obj: u16, attr: u16) -> Result<bool, String> {
        if obj == 0 {
            return Ok(false);
        }
        let max_attr = if self.version() <= 3 { 31 } else { 47 };
        if attr > max_attr {
            return Err(format!("invalid attribute number: {attr}"));
        }
        let addr = self.object_addr(obj)? + attr as u32 / 8;
        let bit = 7 - (attr % 8);
        Ok(self.read_byte(addr) & (1 << bit) != 0)
    }

    /// Set or clear attribute `attr` of object `obj`.
    pub fn set_attribute(&mut self, obj: u16, attr: u16, value: bool) -> Result<(), String> {
        if obj == 0 {
            return Ok(());
        }
        let max_attr = if self.version() <= 3 { 31 } else { 47 };
        if attr > max_attr {
            return Err(format!("invalid attribute number: {attr}"));
        }
        let addr = self.object_addr(obj)? + attr as u32 / 8;
        let bit = 7 - (attr % 8);
        let byte = self.read_byte(addr);
        let byte = if value {
            byte | (1 << bit)
        } else {
            byte & !(1 << bit)
        };
        // Attribute bytes live in dynamic memory; write through the image.
        self.game.memory[addr as usize] = byte;
        Ok(())
    }

    pub fn object_parent(&self, obj: u16) -> Result<u16, String> {
        if obj == 0 {
            return Ok(0);
        }
        let addr = self.object_addr(obj)?;
        if self.version() <= 3 {
            Ok(self.read_byte(addr + 4) as u16)
        } else {
            Ok(self.read_word(addr + 6))
        }
    }

    pub fn object_sibling(&self, obj: u16) -> Result<u16, String> {
        if obj == 0 {
            return Ok(0);
        }
        let addr = self.object_addr(obj)?;
        if self.version() <= 3 {
            Ok(self.read_byte(addr + 5) as u16)
        } else {
            Ok(self.read_word(addr + 8))
        }
    }

    pub fn object_child(&self, obj: u16) -> Result<u16, String> {
        if obj == 0 {
            return Ok(0);
        }
        let addr = self.object_addr(obj)?;
        if self.version() <= 3 {
            Ok(self.read_byte(addr + 6) as u16)
        } else {
            Ok(self.read_word(addr + 10))
        }
    }

    fn set_object_link(&mut self, obj: u16, offset_v3: u32, target: u16) -> Result<(), String> {
        let addr = self.object_addr(obj)?;
        if self.version() <= 3 {
            if target > 255 {
                return Err(format!("object number {target} too large for this version"));
            }
            self.game.memory[(addr + offset_v3) as usize] = target as u8;
        } else {
            let offset = 6 + (offset_v3 - 4) * 2;
            let a = (addr + offset) as usize;
            self.game.memory[a] = (target >> 8) as u8;
            self.game.memory[a + 1] = (target & 0xff) as u8;
        }
        Ok(())
    }

    pub fn set_object_parent(&mut self, obj: u16, parent: u16) -> Result<(), String> {
        self.set_object_link(obj, 4, parent)
    }

    pub fn set_object_sibling(&mut self, obj: u16, sibling: u16) -> Result<(), String> {
        self.set_object_link(obj, 5, sibling)
    }

    pub fn set_object_child(&mut self, obj: u16, child: u16) -> Result<(), String> {
        self.set_object_link(obj, 6, child)
    }

    /// Byte address of the object's property table.
    pub fn property_table_addr(&self, obj: u16) -> Result<u32, String> {
        let addr = self.object_addr(obj)?;
        let offset = if self.version() <= 3 { 7 } else { 12 };
        Ok(self.read_word(addr + offset) as u32)
    }

    /// Decode the object's short name (may be empty).
    pub fn object_name(&self, obj: u16) -> Result<String, String> {
        if obj == 0 {
            return Ok(String::new());
        }
        let table = self.property_table_addr(obj)? as usize;
        if table >= self.game.memory.len() {
            return Err(format!("property table address {table:#06x} out of bounds"));
        }
        let name_words = self.game.memory[table] as usize;
        if name_words == 0 {
            return Ok(String::new());
        }
        let abbrevs = Abbreviations::new(
            &self.game.memory,
            self.game.header.abbrev_table as usize,
        );
        match decode_string(&self.game.memory[table + 1..], true, Some(&abbrevs)) {
            Ok((name, _)) => Ok(name),
            Err(e) => Err(format!("object {obj} name: {e}")),
        }
    }

    /// Decode a property header at `addr`: (number, data size, header bytes).
    fn property_info(&self, addr: u32) -> (u8, usize, u32) {
        let size_byte = self.read_byte(addr);
        if self.version() <= 3 {
            ((size_byte & 0x1f), ((size_byte >> 5) + 1) as usize, 1)
        } else if size_byte & 0x80 != 0 {
            let raw = self.read_byte(addr + 1) & 0x3f;
            let size = if raw == 0 { 64 } else { raw as usize };
            (size_byte & 0x3f, size, 2)
        } else if size_byte & 0x40 != 0 {
            (size_byte & 0x3f, 2, 1)
        } else {
            (size_byte & 0x3f, 1, 1)
        }
    }

    /// Address of the first property header, past the short name.
    fn first_property_addr(&self, obj: u16) -> Result<u32, String> {
        let table = self.property_table_addr(obj)?;
        let name_words = self.read_byte(table) as u32;
        Ok(table + 1 + name_words * 2)
    }

    /// Locate property `prop` of `obj`. Returns the data address and size,
    /// or `None` if the object lacks the property. The address points into
    /// the image so callers can read or write in place.
    pub fn property_slice(&self, obj: u16, prop: u8) -> Result<Option<(u32, usize)>, String> {
        if obj == 0 || prop == 0 {
            return Ok(None);
        }
        let mut addr = self.first_property_addr(obj)?;
        loop {
            if self.read_byte(addr) == 0 {
                return Ok(None);
            }
            let (number, size, header) = self.property_info(addr);
            // Property lists are sorted in descending number order.
            if number == prop {
                return Ok(Some((addr + header, size)));
            }
            if number < prop {
                return Ok(None);
            }
            addr += header + size as u32;
        }
    }

    /// The property number following `prop`, walking the descending list.
    /// `prop == 0` yields the first property; the last yields 0.
    pub fn next_property(&self, obj: u16, prop: u8) -> Result<u8, String> {
        let mut addr = self.first_property_addr(obj)?;
        if prop == 0 {
            let (number, _, _) = self.property_info(addr);
            return Ok(if self.read_byte(addr) == 0 { 0 } else { number });
        }
        loop {
            if self.read_byte(addr) == 0 {
                return Err(format!("object {obj} has no property {prop}"));
            }
            let (number, size, header) = self.property_info(addr);
            addr += header + size as u32;
            if number == prop {
                let (next, _, _) = self.property_info(addr);
                return Ok(if self.read_byte(addr) == 0 { 0 } else { next });
            }
        }
    }

    /// Size in bytes of the property whose data starts at `data_addr`,
    /// re-derived from the header that precedes it.
    pub fn property_len_at(&self, data_addr: u32) -> usize {
        if data_addr == 0 {
            return 0;
        }
        // The byte before the data is always the (last) header byte.
        let size_byte = self.read_byte(data_addr - 1);
        if self.version() <= 3 {
            ((size_byte >> 5) + 1) as usize
        } else if size_byte & 0x80 != 0 {
            let raw = size_byte & 0x3f;
            if raw == 0 {
                64
            } else {
                raw as usize
            }
        } else if size_byte & 0x40 != 0 {
            2
        } else {
            1
        }
    }

    /// Default value for property `prop` from the table before the records.
    pub fn default_property_value(&self, prop: u8) -> Result<u16, String> {
        if prop == 0 || prop as u32 > self.default_count() {
            return Err(format!("no default for property {prop}"));
        }
        let addr = self.game.header.object_table_addr as u32 + (prop as u32 - 1) * 2;
        Ok(self.read_word(addr))
    }

    /// Unlink `obj` from its parent's child chain and orphan it.
    pub fn remove_object(&mut self, obj: u16) -> Result<(), String> {
        if obj == 0 {
            return Ok(());
        }
        let parent = self.object_parent(obj)?;
        if parent == 0 {
            return Ok(());
        }

        let first_child = self.object_child(parent)?;
        if first_child == obj {
            let next = self.object_sibling(obj)?;
            self.set_object_child(parent, next)?;
        } else {
            let mut current = first_child;
            while current != 0 {
                let next = self.object_sibling(current)?;
                if next == obj {
                    let after = self.object_sibling(obj)?;
                    self.set_object_sibling(current, after)?;
                    break;
                }
                current = next;
            }
        }

        self.set_object_parent(obj, 0)?;
        self.set_object_sibling(obj, 0)?;
        Ok(())
    }

    /// Move `obj` to be the first child of `dest`.
    pub fn insert_object(&mut self, obj: u16, dest: u16) -> Result<(), String> {
        if obj == 0 {
            return Err("cannot insert object 0".to_string());
        }
        if dest == 0 {
            return Err("cannot insert into object 0".to_string());
        }
        debug!("insert_object {obj} into {dest}");
        self.remove_object(obj)?;
        let old_child = self.object_child(dest)?;
        self.set_object_child(dest, obj)?;
        self.set_object_parent(obj, dest)?;
        self.set_object_sibling(obj, old_child)
    }
}
