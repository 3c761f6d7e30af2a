use crate::auth::repo_types::User;

/// Capability bits carried on a role. A role grants a mask iff every bit of
/// the mask is set.
pub struct Permission;

impl Permission {
    pub const FOLLOW: i32 = 0x01;
    pub const COMMENT: i32 = 0x02;
    pub const WRITE_ARTICLES: i32 = 0x04;
    pub const MODERATE_COMMENTS: i32 = 0x08;
    pub const ADMINISTER: i32 = 0x80;
}

/// Whether the acting user holds every bit of `permission`. Anonymous
/// callers (`None`) hold nothing, by contract even for an empty mask; a user
/// without a role holds nothing either.
pub fn can(user: Option<&User>, permission: i32) -> bool {
    let Some(user) = user else {
        return false;
    };
    match user.permissions {
        Some(bits) => bits & permission == permission,
        None => false,
    }
}

pub fn is_administrator(user: Option<&User>) -> bool {
    can(user, Permission::ADMINISTER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn user_with_bits(bits: Option<i32>) -> User {
        User {
            id: Uuid::new_v4(),
            email: "user@example.com".into(),
            username: "user".into(),
            password_hash: String::new(),
            confirmed: true,
            role_id: bits.map(|_| Uuid::new_v4()),
            permissions: bits,
            last_seen: OffsetDateTime::now_utc(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn default_role_bits() {
        // Default role: FOLLOW | COMMENT | WRITE_ARTICLES.
        let user = user_with_bits(Some(0x07));
        assert!(can(Some(&user), Permission::FOLLOW));
        assert!(can(Some(&user), Permission::COMMENT));
        assert!(can(Some(&user), Permission::WRITE_ARTICLES));
        assert!(!can(Some(&user), Permission::MODERATE_COMMENTS));
        assert!(!can(Some(&user), Permission::ADMINISTER));
        assert!(!is_administrator(Some(&user)));
    }

    #[test]
    fn composite_masks_require_every_bit() {
        let moderator = user_with_bits(Some(0x0f));
        assert!(can(
            Some(&moderator),
            Permission::WRITE_ARTICLES | Permission::MODERATE_COMMENTS
        ));
        assert!(!can(
            Some(&moderator),
            Permission::MODERATE_COMMENTS | Permission::ADMINISTER
        ));
    }

    #[test]
    fn administrator_holds_the_admin_bit() {
        let admin = user_with_bits(Some(0xff));
        assert!(is_administrator(Some(&admin)));
        assert!(can(Some(&admin), Permission::ADMINISTER | Permission::FOLLOW));
    }

    #[test]
    fn roleless_user_can_nothing() {
        let user = user_with_bits(None);
        assert!(!can(Some(&user), Permission::FOLLOW));
        assert!(!can(Some(&user), Permission::ADMINISTER));
    }

    #[test]
    fn anonymous_can_nothing() {
        assert!(!can(None, Permission::FOLLOW));
        // Fixed contract: even the empty mask is refused for anonymous.
        assert!(!can(None, 0));
        assert!(!is_administrator(None));
    }

    #[test]
    fn zero_mask_is_granted_to_any_signed_in_user() {
        let user = user_with_bits(Some(0));
        assert!(can(Some(&user), 0));
    }
}
