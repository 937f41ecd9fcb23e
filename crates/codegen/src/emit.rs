//! SIMD code emission
//!
//! Walks a vectorized expression graph in post order and renders it as C++
//! source built on `immintrin.h`. Each node is emitted exactly once - a node
//! that already carries a variable name has been visited through another
//! path of the DAG and is skipped.
//!
//! The emitted kernel iterates `for (i = 0, g = 0; i < n; i += num_groups,
//! g++)`, executing every vectorized store once per group of lanes. Loads
//! whose constant offset is not vector-aligned are aligned down and patched
//! up with an in-register shuffle; the supported patterns are dense pairs
//! and even/odd broadcasts.

use tlang_foundation::Address;
use tlang_ir::{Expr, Node, NodeKind};

use crate::error::Error;

/// Emitted variable names are capped at this many per kernel.
const MAX_VARIABLES: usize = 10000;

/// Renders one vectorized kernel as C++ source.
pub struct Emitter {
    simd_width: usize,
    group_size: usize,
    num_groups: usize,
    var_count: usize,
    code: String,
}

impl Emitter {
    pub fn new(simd_width: usize, group_size: usize) -> Self {
        Self {
            simd_width,
            group_size,
            num_groups: simd_width / group_size,
            var_count: 0,
            code: String::new(),
        }
    }

    /// Emit the full source file for the vectorized graph under `root`,
    /// exported as `func_name`.
    pub fn emit(mut self, root: &Expr, func_name: &str) -> Result<String, Error> {
        self.code.push_str("#include <immintrin.h>\n#include <cstdio>\n");
        self.code.push_str("using float32 = float;\n");
        self.code.push_str("using float64 = double;\n\n");
        self.code.push_str(&format!(
            "extern \"C\" void {func_name}(float32 *stream00, float32 *stream01, \
             float32 *stream02, int n) {{\n"
        ));
        self.code.push_str(&format!(
            "for (int i = 0, g = 0; i < n; i += {}, g++) {{\n",
            self.num_groups
        ));
        self.emit_node(root)?;
        self.code.push_str("}\n}\n");
        Ok(self.code)
    }

    fn emit_node(&mut self, expr: &Expr) -> Result<(), Error> {
        debug_assert!(expr.borrow().is_vectorized);

        let children = expr.borrow().ch.clone();
        for child in &children {
            self.emit_node(child)?;
        }

        if !expr.borrow().var_name.is_empty() {
            return Ok(()); // visited through another parent
        }
        let var = self.create_variable()?;
        expr.borrow_mut().var_name = var.clone();

        let node = expr.borrow();
        debug_assert!(node.members.is_empty() || node.members.len() == self.group_size);
        match node.kind {
            NodeKind::Add | NodeKind::Sub | NodeKind::Mul | NodeKind::Div => {
                let op = node.kind.binary_symbol().expect("binary kind");
                let lhs = node.ch[0].borrow().var_name.clone();
                let rhs = node.ch[1].borrow().var_name.clone();
                self.code
                    .push_str(&format!("auto {var} = {lhs} {op} {rhs};\n"));
            }
            NodeKind::Load => self.emit_load(&node, &var)?,
            NodeKind::Store => {
                let store = self.store_instruction();
                let value = node.ch[0].borrow().var_name.clone();
                let addr = self.address_expression(&node.addr)?;
                self.code.push_str(&format!("{store}({addr}, {value});\n"));
            }
            NodeKind::Constant => {
                // Constants broadcast their first lane's literal.
                let set1 = self.set1_instruction();
                let value = node.members.first().map_or(node.value, |m| m.borrow().value);
                self.code
                    .push_str(&format!("auto {var} = {set1}({value:?}f);\n"));
            }
            NodeKind::Combine => {}
        }
        Ok(())
    }

    fn emit_load(&mut self, node: &Node, var: &str) -> Result<(), Error> {
        debug_assert!(
            node.members
                .windows(2)
                .all(|p| p[0].borrow().addr.same_type(&p[1].borrow().addr))
        );
        let offsets: Vec<i64> = node.members.iter().map(|m| m.borrow().addr.offset()).collect();

        let mut addr = node.addr;
        if addr.coeff_aosoa_group_size != self.num_groups as i64 {
            return Err(Error::UnsupportedAccessPattern(format!(
                "load layout has {} elements per group, vectorization needs {}",
                addr.coeff_aosoa_group_size, self.num_groups
            )));
        }

        // Aligned loads only: align the base down and remember that the
        // lanes sit shifted inside the loaded vector.
        let mut needs_shuffle = false;
        if addr.coeff_const % self.simd_width as i64 != 0 {
            addr.coeff_const -= addr.coeff_const % self.simd_width as i64;
            needs_shuffle = true;
        }
        let load = self.load_instruction();
        let base = self.address_expression(&addr)?;
        self.code
            .push_str(&format!("auto {var}_immediate = {load}({base});\n"));

        match self.group_size {
            1 => {
                self.code
                    .push_str(&format!("auto {var} = {var}_immediate;\n"));
            }
            2 => {
                let offset_const = offsets[0] % self.simd_width as i64;
                let offset_inc = offsets[1] - offsets[0];
                match (offset_const, offset_inc) {
                    // Dense pair, lanes already in place.
                    (0, 1) => {
                        self.code
                            .push_str(&format!("auto {var} = {var}_immediate;\n"));
                    }
                    // Broadcast the even element of each pair.
                    (0, 0) => {
                        self.emit_shuffle(var, "0xA0");
                        needs_shuffle = false;
                    }
                    // Broadcast the odd element of each pair.
                    (1, 0) => {
                        self.emit_shuffle(var, "0xF5");
                        needs_shuffle = false;
                    }
                    _ => {
                        return Err(Error::UnsupportedAccessPattern(format!(
                            "load offsets (base {offset_const}, step {offset_inc}) \
                             match no shuffle pattern"
                        )));
                    }
                }
                debug_assert!(!needs_shuffle, "unaligned load left unshuffled");
            }
            _ => {
                return Err(Error::UnsupportedAccessPattern(format!(
                    "packs of {} loads are not supported",
                    self.group_size
                )));
            }
        }
        Ok(())
    }

    fn emit_shuffle(&mut self, var: &str, imm: &str) {
        let shuffle = self.shuffle_instruction();
        self.code.push_str(&format!(
            "auto {var} = {shuffle}({var}_immediate, {var}_immediate, {imm});\n"
        ));
    }

    /// C expression for the address a vectorized memory operation starts at,
    /// in terms of the loop variables `g` and `n`.
    fn address_expression(&self, addr: &Address) -> Result<String, Error> {
        if addr.coeff_aosoa_group_size == 0 {
            return Err(Error::UnsupportedAccessPattern(
                "memory operation with unspecified layout".into(),
            ));
        }
        let stride = addr.coeff_i * self.num_groups as i64
            + self.group_size as i64 / addr.coeff_aosoa_group_size * addr.coeff_aosoa_stride;
        Ok(format!(
            "&stream{:02}[{} * n + {} * g + {}]",
            addr.stream_id, addr.coeff_imax, stride, addr.coeff_const
        ))
    }

    fn create_variable(&mut self) -> Result<String, Error> {
        if self.var_count >= MAX_VARIABLES {
            return Err(Error::VariableLimitExceeded);
        }
        let name = format!("var_{:04}", self.var_count);
        self.var_count += 1;
        Ok(name)
    }

    fn load_instruction(&self) -> &'static str {
        if self.simd_width == 8 {
            "_mm256_load_ps"
        } else {
            "_mm512_load_ps"
        }
    }

    fn store_instruction(&self) -> &'static str {
        if self.simd_width == 8 {
            "_mm256_store_ps"
        } else {
            "_mm512_store_ps"
        }
    }

    fn shuffle_instruction(&self) -> &'static str {
        if self.simd_width == 8 {
            "_mm256_shuffle_ps"
        } else {
            "_mm512_shuffle_ps"
        }
    }

    fn set1_instruction(&self) -> &'static str {
        if self.simd_width == 8 {
            "_mm256_set1_ps"
        } else {
            "_mm512_set1_ps"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlang_ir::{KernelBuilder, Vectorizer, load};

    fn dense(stream: i64, coeff_i: i64, offset: i64) -> Address {
        Address::stream(stream).with_coeff_i(coeff_i).with_offset(offset)
    }

    fn emit_kernel(root: &Expr, simd_width: usize, group_size: usize) -> String {
        let vectorized = Vectorizer::new(group_size, simd_width / group_size)
            .run(root)
            .unwrap();
        Emitter::new(simd_width, group_size)
            .emit(&vectorized, "func000000")
            .unwrap()
    }

    #[test]
    fn test_address_expression() {
        let emitter = Emitter::new(8, 2);
        let addr = Address::stream(1)
            .with_coeff_i(2)
            .with_imax(3)
            .with_offset(5)
            .with_aosoa(4, 0);
        assert_eq!(
            emitter.address_expression(&addr).unwrap(),
            "&stream01[3 * n + 8 * g + 5]"
        );
    }

    #[test]
    fn test_address_expression_aosoa_stride() {
        let emitter = Emitter::new(8, 2);
        let addr = Address::stream(0).with_coeff_i(1).with_aosoa(2, 16);
        // stride = 1 * 4 + 2 / 2 * 16
        assert_eq!(
            emitter.address_expression(&addr).unwrap(),
            "&stream00[0 * n + 20 * g + 0]"
        );
    }

    #[test]
    fn test_variable_budget() {
        let mut emitter = Emitter::new(8, 1);
        emitter.var_count = MAX_VARIABLES;
        assert!(matches!(
            emitter.create_variable(),
            Err(Error::VariableLimitExceeded)
        ));
    }

    #[test]
    fn test_copy_kernel_source() {
        let mut builder = KernelBuilder::new();
        let value = load(dense(0, 1, 0)).unwrap();
        builder.store(&value, dense(1, 1, 0)).unwrap();
        let source = emit_kernel(&builder.finish(), 8, 1);

        let expected = "#include <immintrin.h>\n\
                        #include <cstdio>\n\
                        using float32 = float;\n\
                        using float64 = double;\n\
                        \n\
                        extern \"C\" void func000000(float32 *stream00, float32 *stream01, \
                        float32 *stream02, int n) {\n\
                        for (int i = 0, g = 0; i < n; i += 8, g++) {\n\
                        auto var_0000_immediate = _mm256_load_ps(&stream00[0 * n + 8 * g + 0]);\n\
                        auto var_0000 = var_0000_immediate;\n\
                        _mm256_store_ps(&stream01[0 * n + 8 * g + 0], var_0000);\n\
                        }\n\
                        }\n";
        assert_eq!(source, expected);
    }

    #[test]
    fn test_constant_broadcast() {
        let mut builder = KernelBuilder::new();
        builder
            .store(&Expr::constant(2.5), dense(0, 1, 0))
            .unwrap();
        let source = emit_kernel(&builder.finish(), 8, 1);
        assert!(source.contains("_mm256_set1_ps(2.5f)"));
    }

    #[test]
    fn test_wide_kernel_uses_mm512() {
        let mut builder = KernelBuilder::new();
        let value = load(dense(0, 1, 0)).unwrap();
        builder.store(&value, dense(1, 1, 0)).unwrap();
        let source = emit_kernel(&builder.finish(), 16, 1);
        assert!(source.contains("_mm512_load_ps"));
        assert!(source.contains("_mm512_store_ps"));
        assert!(source.contains("i += 16"));
    }

    #[test]
    fn test_misaligned_layout_rejected() {
        // A user-pinned AOSOA group size that disagrees with the
        // vectorization is not loadable.
        let mut builder = KernelBuilder::new();
        let value = load(dense(0, 1, 0).with_aosoa(4, 32)).unwrap();
        builder.store(&value, dense(1, 1, 0)).unwrap();
        let vectorized = Vectorizer::new(1, 8).run(&builder.finish()).unwrap();
        let err = Emitter::new(8, 1)
            .emit(&vectorized, "func000000")
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedAccessPattern(_)));
    }
}
