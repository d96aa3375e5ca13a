//! Every command and button payload the bot understands.
//!
//! Button payloads are `name` or `name:field:field`. Field order is part of
//! the wire format: buttons already rendered in chats keep the old layout.

use teloxide::utils::command::BotCommands;

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "snake_case", description = "Commands:")]
pub enum Command {
    #[command(description = "main menu")]
    Start(String),
    #[command(description = "leave support chat")]
    StopSupport,
    #[command(description = "cancel the current action")]
    Cancel,
    #[command(description = "admin panel")]
    Admin,
    #[command(description = "statistics")]
    Stats,
    #[command(description = "send a message to every user")]
    Broadcast,
    #[command(rename = "stopbroadcast", description = "stop the running broadcast")]
    StopBroadcast,
    #[command(description = "issue a key")]
    Issue,
    #[command(description = "find a user by id or username")]
    Find(String),
    #[command(rename = "addbal", description = "credit a user: /addbal <id> <amount>")]
    AddBal(String),
    #[command(rename = "flashsale", description = "flash sale: /flashsale <percent> <hours>")]
    FlashSale(String),
    #[command(rename = "stopsale", description = "end the flash sale")]
    StopSale,
    #[command(description = "pin the ticket dashboard in the support chat")]
    InitDashboard,
    #[command(description = "send a sample load alert")]
    WatchdogTest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackData {
    // storefront
    Tariffs,
    Product(i64),
    Plan { product_id: i64, months: u32 },
    PayBalance { product_id: i64, months: u32 },
    MySubs,
    Balance,
    PromoEnter,
    Referral,
    ReferralList(u32),
    Support,
    SupportEnter,
    SupportExit,
    TicketSolve,
    BackMain,
    DeleteMsg,

    // admin
    AdminPanel,
    AdminStats,
    Broadcast,
    BroadcastConfirm,
    BroadcastCancel,
    BroadcastStop,
    Issue,
    IssueProduct(i64),
    IssueDays(u32),
    IssueNoUser,
    IssueCancel,
    FindUser,
    GiftUser(i64),
    AddBalance(i64),
    AddBalanceAmount { user: i64, amount: u32 },
    ReplyTicket(i64),
    CancelReply,
    CloseTicket(i64),
    PromoMenu,
    PromoCreate,
    PromoList,
    PromoDelete,
    PromoStats,
    PromoCancel,
    TopReferrers,
    FlashMenu,
    FlashManual,
    FlashPercent(u32),
    FlashHours(u32),
    FlashQuick { percent: u32, hours: u32 },
    FlashConfirm,
    FlashCancel,
    FlashStop,
}

impl CallbackData {
    pub fn parse(data: &str) -> Option<Self> {
        let mut parts = data.split(':');
        let name = parts.next()?;
        let fields: Vec<&str> = parts.collect();

        fn one<T: std::str::FromStr>(fields: &[&str]) -> Option<T> {
            match fields {
                [a] => a.parse().ok(),
                _ => None,
            }
        }
        fn two<A: std::str::FromStr, B: std::str::FromStr>(fields: &[&str]) -> Option<(A, B)> {
            match fields {
                [a, b] => Some((a.parse().ok()?, b.parse().ok()?)),
                _ => None,
            }
        }
        let none = |value: CallbackData| fields.is_empty().then_some(value);

        use CallbackData::*;
        match name {
            "tariffs" => none(Tariffs),
            "product" => one(&fields).map(Product),
            "plan" => two(&fields).map(|(product_id, months)| Plan { product_id, months }),
            "pay_balance" => {
                two(&fields).map(|(product_id, months)| PayBalance { product_id, months })
            }
            "mysubs" => none(MySubs),
            "balance" => none(Balance),
            "promo_enter" => none(PromoEnter),
            "ref_system" => none(Referral),
            "ref_list" => one(&fields).map(ReferralList),
            "support" => none(Support),
            "ticket_create" => none(SupportEnter),
            "exit_support" => none(SupportExit),
            "ticket_solve" => none(TicketSolve),
            "back_main" => none(BackMain),
            "delete_msg" => none(DeleteMsg),

            "admin_back" => none(AdminPanel),
            "admin_stats" => none(AdminStats),
            "admin_broadcast" => none(Broadcast),
            "admin_confirm_broadcast" => none(BroadcastConfirm),
            "admin_cancel_broadcast" => none(BroadcastCancel),
            "admin_stop_broadcast" => none(BroadcastStop),
            "admin_issue" => none(Issue),
            "issue_product" => one(&fields).map(IssueProduct),
            "issue_days" => one(&fields).map(IssueDays),
            "issue_no_user" => none(IssueNoUser),
            "issue_cancel" => none(IssueCancel),
            "admin_find_user" => none(FindUser),
            "admin_gift" => one(&fields).map(GiftUser),
            "admin_addbal" => one(&fields).map(AddBalance),
            "admin_addbal_amt" => two(&fields).map(|(user, amount)| AddBalanceAmount { user, amount }),
            "admin_reply" => one(&fields).map(ReplyTicket),
            "admin_cancel_reply" => none(CancelReply),
            "admin_close_ticket" => one(&fields).map(CloseTicket),
            "admin_promo" => none(PromoMenu),
            "promo_create" => none(PromoCreate),
            "promo_list" => none(PromoList),
            "promo_delete" => none(PromoDelete),
            "promo_stats" => none(PromoStats),
            "promo_cancel" => none(PromoCancel),
            "admin_top_refs" => none(TopReferrers),
            "admin_flash" => none(FlashMenu),
            "flash_manual" => none(FlashManual),
            "flash_percent" => one(&fields).map(FlashPercent),
            "flash_hours" => one(&fields).map(FlashHours),
            "flash_quick" => two(&fields).map(|(percent, hours)| FlashQuick { percent, hours }),
            "flash_confirm" => none(FlashConfirm),
            "flash_cancel" => none(FlashCancel),
            "flash_stop" => none(FlashStop),
            _ => None,
        }
    }

    pub fn encode(&self) -> String {
        use CallbackData::*;
        match self {
            Tariffs => "tariffs".into(),
            Product(id) => format!("product:{}", id),
            Plan { product_id, months } => format!("plan:{}:{}", product_id, months),
            PayBalance { product_id, months } => format!("pay_balance:{}:{}", product_id, months),
            MySubs => "mysubs".into(),
            Balance => "balance".into(),
            PromoEnter => "promo_enter".into(),
            Referral => "ref_system".into(),
            ReferralList(page) => format!("ref_list:{}", page),
            Support => "support".into(),
            SupportEnter => "ticket_create".into(),
            SupportExit => "exit_support".into(),
            TicketSolve => "ticket_solve".into(),
            BackMain => "back_main".into(),
            DeleteMsg => "delete_msg".into(),

            AdminPanel => "admin_back".into(),
            AdminStats => "admin_stats".into(),
            Broadcast => "admin_broadcast".into(),
            BroadcastConfirm => "admin_confirm_broadcast".into(),
            BroadcastCancel => "admin_cancel_broadcast".into(),
            BroadcastStop => "admin_stop_broadcast".into(),
            Issue => "admin_issue".into(),
            IssueProduct(id) => format!("issue_product:{}", id),
            IssueDays(days) => format!("issue_days:{}", days),
            IssueNoUser => "issue_no_user".into(),
            IssueCancel => "issue_cancel".into(),
            FindUser => "admin_find_user".into(),
            GiftUser(id) => format!("admin_gift:{}", id),
            AddBalance(id) => format!("admin_addbal:{}", id),
            AddBalanceAmount { user, amount } => format!("admin_addbal_amt:{}:{}", user, amount),
            ReplyTicket(id) => format!("admin_reply:{}", id),
            CancelReply => "admin_cancel_reply".into(),
            CloseTicket(id) => format!("admin_close_ticket:{}", id),
            PromoMenu => "admin_promo".into(),
            PromoCreate => "promo_create".into(),
            PromoList => "promo_list".into(),
            PromoDelete => "promo_delete".into(),
            PromoStats => "promo_stats".into(),
            PromoCancel => "promo_cancel".into(),
            TopReferrers => "admin_top_refs".into(),
            FlashMenu => "admin_flash".into(),
            FlashManual => "flash_manual".into(),
            FlashPercent(p) => format!("flash_percent:{}", p),
            FlashHours(h) => format!("flash_hours:{}", h),
            FlashQuick { percent, hours } => format!("flash_quick:{}:{}", percent, hours),
            FlashConfirm => "flash_confirm".into(),
            FlashCancel => "flash_cancel".into(),
            FlashStop => "flash_stop".into(),
        }
    }

    /// Staff-only payloads are refused for everyone else.
    pub fn is_staff_only(&self) -> bool {
        use CallbackData::*;
        !matches!(
            self,
            Tariffs
                | Product(_)
                | Plan { .. }
                | PayBalance { .. }
                | MySubs
                | Balance
                | PromoEnter
                | Referral
                | ReferralList(_)
                | Support
                | SupportEnter
                | SupportExit
                | TicketSolve
                | BackMain
                | DeleteMsg
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multi_field_payloads() {
        assert_eq!(
            CallbackData::parse("flash_quick:50:24"),
            Some(CallbackData::FlashQuick {
                percent: 50,
                hours: 24
            })
        );
        assert_eq!(
            CallbackData::parse("admin_addbal_amt:42:450"),
            Some(CallbackData::AddBalanceAmount {
                user: 42,
                amount: 450
            })
        );
        assert_eq!(
            CallbackData::parse("admin_close_ticket:777"),
            Some(CallbackData::CloseTicket(777))
        );
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert_eq!(CallbackData::parse("flash_quick:50"), None);
        assert_eq!(CallbackData::parse("issue_days:abc"), None);
        assert_eq!(CallbackData::parse("tariffs:1"), None);
        assert_eq!(CallbackData::parse("unknown"), None);
        assert_eq!(CallbackData::parse(""), None);
    }

    #[test]
    fn encode_matches_parse() {
        for data in [
            CallbackData::Plan {
                product_id: 3,
                months: 12,
            },
            CallbackData::ReferralList(2),
            CallbackData::GiftUser(-5),
            CallbackData::FlashStop,
        ] {
            assert_eq!(CallbackData::parse(&data.encode()), Some(data));
        }
    }

    #[test]
    fn staff_payloads_are_flagged() {
        assert!(CallbackData::CloseTicket(1).is_staff_only());
        assert!(CallbackData::FlashConfirm.is_staff_only());
        assert!(!CallbackData::TicketSolve.is_staff_only());
    }

    #[test]
    fn parses_commands_with_arguments() {
        assert_eq!(
            Command::parse("/flashsale 50 24", "frogvpn_bot").ok(),
            Some(Command::FlashSale("50 24".into()))
        );
        assert_eq!(
            Command::parse("/stop_support", "frogvpn_bot").ok(),
            Some(Command::StopSupport)
        );
        assert_eq!(
            Command::parse("/addbal 42 100", "frogvpn_bot").ok(),
            Some(Command::AddBal("42 100".into()))
        );
    }
}
