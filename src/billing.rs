//! Upload gating: monthly tier quotas or per-upload credits.
//!
//! | Tier  | Books / month | Notes / month |
//! |-------|---------------|---------------|
//! | free  | not allowed   | 2             |
//! | basic | 10            | 20            |
//! | pro   | unlimited     | unlimited     |
//!
//! Under the credits model a book costs 5 credits and notes cost 1. Every
//! upload is treated as paid for, so credit users get the pro pipeline.

use crate::catalog::{Account, MonthlyUsage};
use crate::config::{Tier, UploadType};
use crate::error::Book2CourseError;
use serde::{Deserialize, Serialize};

/// Credits a new account starts with.
pub const DEFAULT_INITIAL_CREDITS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    /// `None` means unlimited.
    pub books_limit: Option<usize>,
    pub notes_limit: Option<usize>,
    pub can_upload_books: bool,
}

impl TierLimits {
    pub fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::Free => TierLimits {
                books_limit: Some(0),
                notes_limit: Some(2),
                can_upload_books: false,
            },
            Tier::Basic => TierLimits {
                books_limit: Some(10),
                notes_limit: Some(20),
                can_upload_books: true,
            },
            Tier::Pro => TierLimits {
                books_limit: None,
                notes_limit: None,
                can_upload_books: true,
            },
        }
    }

    pub fn limit(&self, upload_type: UploadType) -> Option<usize> {
        match upload_type {
            UploadType::Book => self.books_limit,
            UploadType::Notes => self.notes_limit,
        }
    }
}

/// Credits charged for one upload.
pub fn credit_cost(upload_type: UploadType) -> u32 {
    match upload_type {
        UploadType::Book => 5,
        UploadType::Notes => 1,
    }
}

/// How uploads are paid for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingModel {
    /// Each upload consumes credits. (default)
    #[default]
    Credits,
    /// Monthly quotas by subscription tier.
    Subscription,
}

impl BillingModel {
    /// Check whether `account` may make an upload of `upload_type`.
    ///
    /// Credits are only checked here; deduction happens once the upload has
    /// been validated.
    pub fn check_upload(
        self,
        account: &Account,
        usage: &MonthlyUsage,
        upload_type: UploadType,
    ) -> Result<(), Book2CourseError> {
        match self {
            BillingModel::Credits => {
                let cost = credit_cost(upload_type);
                if account.credits < cost {
                    return Err(Book2CourseError::InsufficientCredits {
                        required: cost,
                        available: account.credits,
                    });
                }
                Ok(())
            }
            BillingModel::Subscription => {
                let limits = TierLimits::for_tier(account.effective_tier());
                if upload_type == UploadType::Book && !limits.can_upload_books {
                    return Err(Book2CourseError::UploadNotAllowed {
                        reason: "Book uploads require a Basic or Pro subscription".to_string(),
                    });
                }
                if let Some(limit) = limits.limit(upload_type) {
                    let current = usage.count(upload_type);
                    if current >= limit {
                        let what = match upload_type {
                            UploadType::Book => "book",
                            UploadType::Notes => "notes",
                        };
                        return Err(Book2CourseError::UploadNotAllowed {
                            reason: format!(
                                "Monthly {what} limit reached ({current}/{limit}). Upgrade for more."
                            ),
                        });
                    }
                }
                Ok(())
            }
        }
    }

    /// Tier the pipeline runs at for this account's uploads.
    pub fn processing_tier(self, account: &Account) -> Tier {
        match self {
            BillingModel::Credits => Tier::Pro,
            BillingModel::Subscription => account.effective_tier(),
        }
    }

    /// Whether uploads deduct credits.
    pub fn charges_credits(self) -> bool {
        self == BillingModel::Credits
    }
}

/// What the usage endpoint reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    pub credits: u32,
    pub tier: Tier,
    pub book_cost: u32,
    pub notes_cost: u32,
    pub books_this_month: usize,
    pub notes_this_month: usize,
    pub limits: TierLimits,
}

impl UsageReport {
    pub fn new(account: &Account, usage: &MonthlyUsage) -> Self {
        let tier = account.effective_tier();
        Self {
            credits: account.credits,
            tier,
            book_cost: credit_cost(UploadType::Book),
            notes_cost: credit_cost(UploadType::Notes),
            books_this_month: usage.books,
            notes_this_month: usage.notes,
            limits: TierLimits::for_tier(tier),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(tier: Tier, active: bool, credits: u32) -> Account {
        Account {
            user_id: "u1".into(),
            tier,
            subscription_active: active,
            credits,
        }
    }

    #[test]
    fn credits_model_checks_balance() {
        let usage = MonthlyUsage::default();
        let poor = account(Tier::Free, false, 3);
        assert!(BillingModel::Credits.check_upload(&poor, &usage, UploadType::Notes).is_ok());
        let err = BillingModel::Credits
            .check_upload(&poor, &usage, UploadType::Book)
            .unwrap_err();
        assert!(matches!(err, Book2CourseError::InsufficientCredits { required: 5, available: 3 }));
        assert_eq!(BillingModel::Credits.processing_tier(&poor), Tier::Pro);
    }

    #[test]
    fn free_tier_cannot_upload_books() {
        let free = account(Tier::Free, false, 0);
        let err = BillingModel::Subscription
            .check_upload(&free, &MonthlyUsage::default(), UploadType::Book)
            .unwrap_err();
        assert_eq!(err.to_string(), "Book uploads require a Basic or Pro subscription");
    }

    #[test]
    fn monthly_limits() {
        let free = account(Tier::Free, false, 0);
        let usage = MonthlyUsage { books: 0, notes: 2 };
        let err = BillingModel::Subscription
            .check_upload(&free, &usage, UploadType::Notes)
            .unwrap_err();
        assert_eq!(err.to_string(), "Monthly notes limit reached (2/2). Upgrade for more.");

        let basic = account(Tier::Basic, true, 0);
        let usage = MonthlyUsage { books: 9, notes: 20 };
        assert!(BillingModel::Subscription
            .check_upload(&basic, &usage, UploadType::Book)
            .is_ok());
        assert!(BillingModel::Subscription
            .check_upload(&basic, &usage, UploadType::Notes)
            .is_err());

        let pro = account(Tier::Pro, true, 0);
        let heavy = MonthlyUsage { books: 500, notes: 500 };
        assert!(BillingModel::Subscription.check_upload(&pro, &heavy, UploadType::Book).is_ok());
        assert_eq!(BillingModel::Subscription.processing_tier(&pro), Tier::Pro);
    }

    #[test]
    fn lapsed_subscription_is_free() {
        let lapsed = account(Tier::Basic, false, 0);
        assert_eq!(BillingModel::Subscription.processing_tier(&lapsed), Tier::Free);
        let report = UsageReport::new(&lapsed, &MonthlyUsage::default());
        assert_eq!(report.tier, Tier::Free);
        assert_eq!((report.book_cost, report.notes_cost), (5, 1));
        assert!(!report.limits.can_upload_books);
    }
}
