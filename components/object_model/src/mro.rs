//! C3 method resolution order.

use core_types::{AttrError, AttrResult, TypeId};

/// Linearize `ty` over `bases`, given the MRO of each base.
///
/// Fails with [`AttrError::MroConflict`] when the bases admit no
/// consistent order.
pub fn c3_linearize<F>(ty: TypeId, name: &str, bases: &[TypeId], mro_of: F) -> AttrResult<Vec<TypeId>>
where
    F: Fn(TypeId) -> Vec<TypeId>,
{
    let mut seqs: Vec<Vec<TypeId>> = bases.iter().map(|&b| mro_of(b)).collect();
    seqs.push(bases.to_vec());

    let mut result = vec![ty];
    loop {
        seqs.retain(|s| !s.is_empty());
        if seqs.is_empty() {
            return Ok(result);
        }

        let candidate = seqs
            .iter()
            .map(|s| s[0])
            .find(|c| !seqs.iter().any(|s| s[1..].contains(c)));

        let Some(next) = candidate else {
            return Err(AttrError::MroConflict(name.to_string()));
        };
        if next == ty {
            return Err(AttrError::MroConflict(name.to_string()));
        }

        result.push(next);
        for seq in seqs.iter_mut() {
            if seq[0] == next {
                seq.remove(0);
            }
        }
    }
}
