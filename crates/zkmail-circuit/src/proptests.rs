use num_bigint::BigUint;
use num_traits::One;
use proptest::prelude::*;

use crate::bounded::BoundedVec;
use crate::config::{CircuitConfig, ReductionParam};
use crate::limbs::{join_limbs, montgomery_radix, reduction_constant, split_limbs, RsaPublicKeyLimbs};

fn odd_modulus() -> impl Strategy<Value = BigUint> {
    // top bit set so the value is exactly 2048 bits, low bit set so it is odd
    proptest::collection::vec(any::<u8>(), 256).prop_map(|mut bytes| {
        bytes[0] |= 0x80;
        bytes[255] |= 0x01;
        BigUint::from_bytes_be(&bytes)
    })
}

proptest! {
    #[test]
    fn test_bounded_vec_prefix_and_zero_padding(
        bytes in proptest::collection::vec(any::<u8>(), 0..512),
        extra in 0usize..64,
    ) {
        let capacity = bytes.len() + extra;
        let v = BoundedVec::wrap(&bytes, capacity).unwrap();
        prop_assert_eq!(&v.storage()[..v.len()], &bytes[..]);
        prop_assert!(v.storage()[v.len()..].iter().all(|&b| b == 0));
        prop_assert_eq!(v.capacity(), capacity);
    }

    #[test]
    fn test_bounded_vec_rejects_overflow(bytes in proptest::collection::vec(any::<u8>(), 1..256)) {
        prop_assert!(BoundedVec::wrap(&bytes, bytes.len() - 1).is_none());
    }

    #[test]
    fn test_limbs_reconstruct_modulus(n in odd_modulus()) {
        let limbs = split_limbs(&n, 121, 17).unwrap();
        prop_assert_eq!(limbs.len(), 17);
        prop_assert!(limbs.iter().all(|l| l.bits() <= 121));
        prop_assert_eq!(join_limbs(&limbs, 121), n.clone());

        let config = CircuitConfig::default();
        let key = RsaPublicKeyLimbs::from_modulus(&n, &config).unwrap();
        prop_assert_eq!(key.modulus.len(), 18);
        prop_assert_eq!(key.modulus_value(&config), n);
    }

    #[test]
    fn test_montgomery_constant_relation(n in odd_modulus()) {
        let config = CircuitConfig::default();
        let redc = reduction_constant(&n, &config).unwrap();
        let r = montgomery_radix(&config);
        prop_assert!(redc < n);
        prop_assert_ne!(&redc, &n);
        // redc * R^-1 == R (mod n), checked without inverses: redc == R*R mod n
        prop_assert_eq!((&r % &n) * (&r % &n) % &n, redc);
    }

    #[test]
    fn test_barrett_constant_bounds(n in odd_modulus()) {
        let config = CircuitConfig { reduction: ReductionParam::Barrett, ..Default::default() };
        let mu = reduction_constant(&n, &config).unwrap();
        let shift = 2 * n.bits() as usize + 4;
        let top = BigUint::one() << shift;
        prop_assert!(&mu * &n <= top);
        prop_assert!((&mu + 1u32) * &n > top);
    }
}
